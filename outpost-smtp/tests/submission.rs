use std::{sync::Arc, time::Duration};

use outpost_common::{DeliveryStats, Limits, Signal};
use outpost_queue::{MemoryQueue, Queue, Submitter};
use outpost_smtp::{SmtpClient, SubmissionConfig, SubmissionServer};
use pretty_assertions::assert_eq;
use tokio::{net::TcpListener, sync::broadcast};

#[tokio::test]
async fn client_submits_through_listener() {
    let queue = Arc::new(MemoryQueue::new(10, Duration::from_secs(60)));
    let stats = Arc::new(DeliveryStats::new());
    let submitter = Submitter::new(
        Arc::clone(&queue) as Arc<dyn Queue>,
        Arc::clone(&stats),
        Limits::default(),
    );
    let server = Arc::new(SubmissionServer::new(
        &SubmissionConfig::default(),
        "relay.test",
        submitter,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (shutdown, receiver) = broadcast::channel(1);
    let serving = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve_on(listener, receiver).await }
    });

    let mut client = SmtpClient::connect(&address.to_string(), "relay.test")
        .await
        .unwrap();
    assert_eq!(client.read_greeting().await.unwrap().code, 220);

    let ehlo = client.ehlo("client.test").await.unwrap();
    assert!(ehlo.is_success());
    assert!(ehlo.supports("SIZE"));
    assert!(!ehlo.supports("STARTTLS"));

    assert_eq!(client.mail_from("sender@example.com").await.unwrap().code, 250);
    assert_eq!(client.rcpt_to("first@example.org").await.unwrap().code, 250);
    assert_eq!(client.rcpt_to("second@example.net").await.unwrap().code, 250);
    assert_eq!(client.data().await.unwrap().code, 354);

    let accepted = client
        .send_data("Subject: Integration\r\nCc: second@example.net\r\n\r\nHello\n.dot line\n")
        .await
        .unwrap();
    assert_eq!(accepted.code, 250);
    assert!(accepted.message().contains("queued as"));
    assert_eq!(client.quit().await.unwrap().code, 221);

    shutdown.send(Signal::Shutdown).unwrap();
    serving.await.unwrap().unwrap();

    assert_eq!(queue.size(), 1);
    assert_eq!(stats.snapshot().sent, 1);

    let message = queue.dequeue(1).remove(0);
    assert_eq!(message.subject, "Integration");
    assert_eq!(message.to, vec!["first@example.org"]);
    assert_eq!(message.cc, vec!["second@example.net"]);
    assert!(message.body.contains("\r\n.dot line"));
}

#[tokio::test]
async fn listener_stops_on_closed_channel() {
    let queue = Arc::new(MemoryQueue::new(1, Duration::from_secs(60)));
    let submitter = Submitter::new(queue, Arc::new(DeliveryStats::new()), Limits::default());
    let server = SubmissionServer::new(&SubmissionConfig::default(), "relay.test", submitter);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (shutdown, receiver) = broadcast::channel::<Signal>(1);
    drop(shutdown);

    tokio::time::timeout(Duration::from_secs(5), server.serve_on(listener, receiver))
        .await
        .expect("listener did not stop")
        .unwrap();
}
