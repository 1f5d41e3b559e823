use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use outpost::{Config, Outpost};
use outpost_common::{Message, Signal};
use outpost_delivery::{DnsError, MailExchanger, MxResolver, Transport, TransportError};
use outpost_smtp::SmtpClient;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::broadcast,
};

const TOKEN: &str = "integration-token";

struct StaticResolver;

#[async_trait]
impl MxResolver for StaticResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<MailExchanger>, DnsError> {
        Ok(vec![
            MailExchanger::new(format!("mx1.{domain}"), 10),
            MailExchanger::new(format!("mx2.{domain}"), 20),
        ])
    }
}

/// Refuses the primary exchanger and records what reaches the rest.
#[derive(Default)]
struct RecordingTransport {
    delivered: Mutex<Vec<(String, Message)>>,
    reject_all: bool,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(
        &self,
        host: &str,
        message: &Message,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        if self.reject_all {
            return Err(TransportError::Rejected {
                code: 550,
                message: "mailbox unavailable".to_string(),
            });
        }
        if host.starts_with("mx1.") {
            return Err(TransportError::ConnectionFailed("connection refused".to_string()));
        }

        self.delivered.lock().push((host.to_string(), message.clone()));
        Ok(())
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn config(smtp_port: u16, api_port: u16, max_retries: u32) -> Config {
    Config::parse(&format!(
        r#"(
            hostname: "relay.test",
            smtp: (listen_address: "127.0.0.1:{smtp_port}"),
            api: (listen_address: "127.0.0.1:{api_port}", auth_token: "{TOKEN}"),
            queue: (retry_delay_secs: 0),
            delivery: (workers: 2, poll_interval_ms: 20, max_retries: {max_retries}),
        )"#
    ))
    .unwrap()
}

async fn connect(port: u16) -> SmtpClient {
    let address = format!("127.0.0.1:{port}");
    for _ in 0..100 {
        if let Ok(client) = SmtpClient::connect(&address, "relay.test").await {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("submission listener never came up on {address}");
}

/// Submits one message over SMTP and returns the queued message id.
async fn submit(port: u16, subject: &str) -> String {
    let mut client = connect(port).await;
    assert_eq!(client.read_greeting().await.unwrap().code, 220);
    assert!(client.ehlo("client.test").await.unwrap().is_success());
    assert_eq!(client.mail_from("sender@example.com").await.unwrap().code, 250);
    assert_eq!(client.rcpt_to("rcpt@example.org").await.unwrap().code, 250);
    assert_eq!(client.data().await.unwrap().code, 354);

    let accepted = client
        .send_data(&format!("Subject: {subject}\r\n\r\nHello there\r\n"))
        .await
        .unwrap();
    assert_eq!(accepted.code, 250);
    client.quit().await.unwrap();

    accepted
        .message()
        .rsplit(' ')
        .next()
        .unwrap()
        .trim()
        .to_string()
}

async fn http_get(port: u16, path: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nAuthorization: Bearer {TOKEN}\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn eventually(mut check: impl AsyncFnMut() -> bool) {
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn relays_submitted_message_to_backup_exchanger() {
    let (smtp_port, api_port) = (free_port(), free_port());
    let transport = Arc::new(RecordingTransport::default());
    let (signals, _) = broadcast::channel(16);

    let relay = Outpost::new(config(smtp_port, api_port, 3))
        .with_resolver(Arc::new(StaticResolver))
        .with_transport(Arc::clone(&transport) as Arc<dyn Transport>);
    let running = tokio::spawn(relay.serve(signals.clone()));

    let id = submit(smtp_port, "Integration").await;
    let path = format!("/status/{id}");

    eventually(async || http_get(api_port, &path).await.contains("\"status\":\"delivered\"")).await;
    {
        let delivered = transport.delivered.lock();
        assert_eq!(delivered.len(), 1);
        let (host, message) = &delivered[0];
        assert_eq!(host, "mx2.example.org");
        assert_eq!(message.id.as_str(), id);
        assert_eq!(message.subject, "Integration");
        assert_eq!(message.to, vec!["rcpt@example.org"]);
    }

    let status = http_get(api_port, &path).await;
    assert!(status.starts_with("HTTP/1.1 200"), "{status}");
    assert!(status.contains("\"retry_count\":0"), "{status}");

    let stats = http_get(api_port, "/stats").await;
    assert!(stats.contains("\"total_sent\":1"), "{stats}");
    assert!(stats.contains("\"total_delivered\":1"), "{stats}");
    assert!(stats.contains("\"queue_size\":0"), "{stats}");

    let mut finalised = signals.subscribe();
    signals.send(Signal::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("relay did not stop")
        .unwrap()
        .unwrap();

    let mut seen_final = false;
    while let Ok(signal) = finalised.try_recv() {
        seen_final |= signal == Signal::Finalised;
    }
    assert!(seen_final);
}

#[tokio::test]
async fn exhausted_retries_are_reported_as_failed() {
    let (smtp_port, api_port) = (free_port(), free_port());
    let transport = Arc::new(RecordingTransport {
        reject_all: true,
        ..RecordingTransport::default()
    });
    let (signals, _) = broadcast::channel(16);

    let relay = Outpost::new(config(smtp_port, api_port, 1))
        .with_resolver(Arc::new(StaticResolver))
        .with_transport(transport);
    let running = tokio::spawn(relay.serve(signals.clone()));

    let id = submit(smtp_port, "Doomed").await;
    let path = format!("/status/{id}");

    eventually(async || http_get(api_port, &path).await.contains("\"status\":\"failed\"")).await;

    let status = http_get(api_port, &path).await;
    assert!(status.contains("\"retry_count\":1"), "{status}");
    assert!(status.contains("mailbox unavailable"), "{status}");

    let stats = http_get(api_port, "/stats").await;
    assert!(stats.contains("\"total_failed\":1"), "{stats}");
    assert!(stats.contains("\"total_retried\":1"), "{stats}");

    signals.send(Signal::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("relay did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn api_rejects_missing_token() {
    let (smtp_port, api_port) = (free_port(), free_port());
    let (signals, _) = broadcast::channel(16);

    let relay = Outpost::new(config(smtp_port, api_port, 1))
        .with_resolver(Arc::new(StaticResolver))
        .with_transport(Arc::new(RecordingTransport::default()));
    let running = tokio::spawn(relay.serve(signals.clone()));

    // The SMTP listener binds last, so once it answers the API is up too.
    drop(connect(smtp_port).await);

    let mut stream = TcpStream::connect(("127.0.0.1", api_port)).await.unwrap();
    stream
        .write_all(b"GET /stats HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 401"), "{response}");

    signals.send(Signal::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("relay did not stop")
        .unwrap()
        .unwrap();
}
