//! Scriptable SMTP server for exercising the delivery transport.
#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// A command as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// The message body with dot-stuffing still applied.
    Content(String),
    StartTls,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Script {
    greeting: String,
    ehlo: Option<Vec<String>>,
    mail_from: String,
    rcpt_to: String,
    data: String,
    data_end: String,
    starttls: Option<String>,
    hang_on_command: Option<usize>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: "220 mock.test ESMTP".into(),
            ehlo: Some(vec!["mock.test".into(), "SIZE 10000".into()]),
            mail_from: "250 OK".into(),
            rcpt_to: "250 OK".into(),
            data: "354 End data with <CR><LF>.<CR><LF>".into(),
            data_end: "250 OK: queued".into(),
            starttls: None,
            hang_on_command: None,
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    handle: JoinHandle<()>,
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockSmtpServer {
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    /// `host:port` suitable for [`outpost_delivery::Transport::deliver`].
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }

    async fn handle_client(
        stream: TcpStream,
        script: Arc<Script>,
        received: Arc<Mutex<Vec<Received>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut count = 0;

        writer
            .write_all(format!("{}\r\n", script.greeting).as_bytes())
            .await?;

        loop {
            if script.hang_on_command == Some(count) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }

            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            count += 1;

            let command = line.trim_end();
            let (verb, argument) = command.split_once(' ').unwrap_or((command, ""));

            let (reply, record) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => match &script.ehlo {
                    Some(capabilities) => {
                        let last = capabilities.len() - 1;
                        let reply = capabilities
                            .iter()
                            .enumerate()
                            .map(|(i, cap)| {
                                format!("250{}{cap}", if i == last { ' ' } else { '-' })
                            })
                            .collect::<Vec<_>>()
                            .join("\r\n");
                        (reply, Received::Ehlo(argument.to_string()))
                    }
                    None => (
                        "502 Command not implemented".into(),
                        Received::Ehlo(argument.to_string()),
                    ),
                },
                "HELO" => ("250 mock.test".into(), Received::Helo(argument.to_string())),
                "MAIL" => (
                    script.mail_from.clone(),
                    Received::MailFrom(argument.to_string()),
                ),
                "RCPT" => (
                    script.rcpt_to.clone(),
                    Received::RcptTo(argument.to_string()),
                ),
                "DATA" => (script.data.clone(), Received::Data),
                "STARTTLS" => (
                    script
                        .starttls
                        .clone()
                        .unwrap_or_else(|| "502 Command not implemented".into()),
                    Received::StartTls,
                ),
                "QUIT" => {
                    received.lock().push(Received::Quit);
                    writer.write_all(b"221 Bye\r\n").await?;
                    return Ok(());
                }
                _ => (
                    "500 Unknown command".into(),
                    Received::Other(command.to_string()),
                ),
            };

            let is_data = record == Received::Data;
            received.lock().push(record);
            writer.write_all(format!("{reply}\r\n").as_bytes()).await?;

            if is_data && reply.starts_with('3') {
                let mut content = String::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).await? == 0 {
                        return Ok(());
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    content.push_str(&line);
                }
                received.lock().push(Received::Content(content));
                writer
                    .write_all(format!("{}\r\n", script.data_end).as_bytes())
                    .await?;
            }
        }
    }
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, reply: &str) -> Self {
        self.script.greeting = reply.into();
        self
    }

    /// `None` makes the server reject EHLO so clients fall back to HELO.
    #[must_use]
    pub fn with_ehlo(mut self, capabilities: Option<&[&str]>) -> Self {
        self.script.ehlo =
            capabilities.map(|caps| caps.iter().map(ToString::to_string).collect());
        self
    }

    #[must_use]
    pub fn with_mail_from(mut self, reply: &str) -> Self {
        self.script.mail_from = reply.into();
        self
    }

    #[must_use]
    pub fn with_rcpt_to(mut self, reply: &str) -> Self {
        self.script.rcpt_to = reply.into();
        self
    }

    #[must_use]
    pub fn with_data_end(mut self, reply: &str) -> Self {
        self.script.data_end = reply.into();
        self
    }

    #[must_use]
    pub fn with_starttls(mut self, reply: &str) -> Self {
        self.script.starttls = Some(reply.into());
        self
    }

    /// Stop answering before reading the nth command (0 is the first).
    #[must_use]
    pub const fn hang_on_command(mut self, index: usize) -> Self {
        self.script.hang_on_command = Some(index);
        self
    }

    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let script = Arc::new(self.script);
        let received = Arc::new(Mutex::new(Vec::new()));

        let handle = tokio::spawn({
            let received = Arc::clone(&received);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(MockSmtpServer::handle_client(
                        stream,
                        Arc::clone(&script),
                        Arc::clone(&received),
                    ));
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            received,
            handle,
        })
    }
}
