use std::{net::SocketAddr, sync::Arc, time::Duration};

use outpost_common::{incoming, internal, outgoing, tracing};
use outpost_queue::{QueueError, SubmitError, Submitter};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    time::timeout,
};

use super::{command::Command, ingest::build_message};

/// Longest command line accepted, including CRLF (RFC 5321 section 4.5.3.1.4).
const MAX_COMMAND_LINE: usize = 512;

#[derive(Debug)]
pub(crate) struct SessionContext {
    pub hostname: String,
    pub submitter: Submitter,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
}

enum Outcome {
    Continue,
    Close,
}

/// One client connection on the submission port.
pub(crate) struct Session<S> {
    stream: BufReader<S>,
    peer: SocketAddr,
    context: Arc<SessionContext>,
    state: State,
    sender: Option<String>,
    recipients: Vec<String>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(stream: S, peer: SocketAddr, context: Arc<SessionContext>) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer,
            context,
            state: State::Connected,
            sender: None,
            recipients: Vec::new(),
        }
    }

    pub async fn run(mut self) -> std::io::Result<()> {
        internal!("Session started for {}", self.peer);
        let greeting = format!("{} ESMTP outpost ready", self.context.hostname);
        self.reply(220, &greeting).await?;

        let mut line = Vec::new();
        loop {
            line.clear();
            let read = self.stream.read_until(b'\n', &mut line);
            match timeout(self.context.read_timeout, read).await {
                Err(_) => {
                    self.reply(421, "4.4.2 Idle timeout, closing connection").await?;
                    break;
                }
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(err),
            }

            if line.len() > MAX_COMMAND_LINE {
                self.reply(500, "5.5.6 Line too long").await?;
                continue;
            }

            let command = Command::from(String::from_utf8_lossy(&line).as_ref());
            incoming!("{} {}", self.peer, command);

            if matches!(self.handle(command).await?, Outcome::Close) {
                break;
            }
        }

        internal!("Session finished for {}", self.peer);
        Ok(())
    }

    async fn handle(&mut self, command: Command) -> std::io::Result<Outcome> {
        match command {
            Command::Helo(_) => {
                self.reset(State::Greeted);
                let hostname = self.context.hostname.clone();
                self.reply(250, &hostname).await?;
            }
            Command::Ehlo(_) => {
                self.reset(State::Greeted);
                let size = format!("SIZE {}", self.context.submitter.limits().max_message_size);
                let hostname = self.context.hostname.clone();
                self.reply_lines(250, &[&hostname, &size, "8BITMIME", "PIPELINING"])
                    .await?;
            }
            Command::MailFrom(_) if self.state != State::Greeted => {
                self.reply(503, "5.5.1 Bad sequence of commands").await?;
            }
            Command::MailFrom(None) => {
                self.reply(550, "5.1.7 Null sender not accepted for submission")
                    .await?;
            }
            Command::MailFrom(Some(sender)) => {
                self.sender = Some(sender);
                self.state = State::MailFrom;
                self.reply(250, "2.1.0 Ok").await?;
            }
            Command::RcptTo(_) if !matches!(self.state, State::MailFrom | State::RcptTo) => {
                self.reply(503, "5.5.1 Bad sequence of commands").await?;
            }
            Command::RcptTo(_)
                if self.recipients.len() >= self.context.submitter.limits().max_recipients =>
            {
                self.reply(452, "4.5.3 Too many recipients").await?;
            }
            Command::RcptTo(recipient) => {
                self.recipients.push(recipient);
                self.state = State::RcptTo;
                self.reply(250, "2.1.5 Ok").await?;
            }
            Command::Data if self.state != State::RcptTo => {
                self.reply(503, "5.5.1 Bad sequence of commands").await?;
            }
            Command::Data => self.receive_data().await?,
            Command::Rset => {
                if self.state != State::Connected {
                    self.reset(State::Greeted);
                }
                self.reply(250, "2.0.0 Ok").await?;
            }
            Command::Noop => self.reply(250, "2.0.0 Ok").await?,
            Command::Vrfy => self.reply(252, "2.5.0 Cannot VRFY user").await?,
            Command::Quit => {
                self.reply(221, "2.0.0 Bye").await?;
                return Ok(Outcome::Close);
            }
            Command::Invalid(reason) => {
                self.reply(500, &format!("5.5.2 Syntax error: {reason}"))
                    .await?;
            }
        }

        Ok(Outcome::Continue)
    }

    async fn receive_data(&mut self) -> std::io::Result<()> {
        self.reply(354, "End data with <CR><LF>.<CR><LF>").await?;

        let limit = self.context.submitter.limits().max_message_size;
        let mut data = Vec::new();
        let mut oversized = false;
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = timeout(self.context.read_timeout, self.stream.read_until(b'\n', &mut line))
                .await
                .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;
            if read == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
            }

            if line == b".\r\n" || line == b".\n" {
                break;
            }

            let content = if line.starts_with(b"..") { &line[1..] } else { &line[..] };
            if data.len() + content.len() > limit {
                oversized = true;
            } else if !oversized {
                data.extend_from_slice(content);
            }
        }

        let (sender, recipients) = (
            self.sender.take().unwrap_or_default(),
            std::mem::take(&mut self.recipients),
        );
        self.reset(State::Greeted);

        if oversized {
            return self
                .reply(552, "5.3.4 Message size exceeds fixed maximum message size")
                .await;
        }

        let message = match build_message(&sender, &recipients, &data) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(
                    peer = %self.peer,
                    error = %err,
                    "Unable to parse submitted message"
                );
                return self.reply(554, "5.6.0 Malformed message").await;
            }
        };

        match self.context.submitter.submit(message) {
            Ok(id) => self.reply(250, &format!("2.0.0 Ok: queued as {id}")).await,
            Err(SubmitError::Queue(QueueError::Full { .. })) => {
                tracing::warn!(peer = %self.peer, "Queue full, deferring submission");
                self.reply(452, "4.3.1 Insufficient system storage").await
            }
            Err(SubmitError::Queue(err)) => {
                tracing::error!(peer = %self.peer, error = %err, "Unable to queue message");
                self.reply(451, "4.3.0 Local error in processing").await
            }
            Err(SubmitError::Invalid(err)) => self.reply(554, &format!("5.6.0 {err}")).await,
        }
    }

    fn reset(&mut self, state: State) {
        self.sender = None;
        self.recipients.clear();
        self.state = state;
    }

    async fn reply(&mut self, code: u16, text: &str) -> std::io::Result<()> {
        self.reply_lines(code, &[text]).await
    }

    async fn reply_lines(&mut self, code: u16, lines: &[&str]) -> std::io::Result<()> {
        let mut out = String::new();
        for (i, line) in lines.iter().enumerate() {
            let separator = if i + 1 == lines.len() { ' ' } else { '-' };
            out.push_str(&format!("{code}{separator}{line}\r\n"));
        }
        outgoing!("{} {}", self.peer, out.trim_end());

        let stream = self.stream.get_mut();
        stream.write_all(out.as_bytes()).await?;
        stream.flush().await
    }
}
