//! Service lifecycle tests: run/shutdown, worker bounding, and failure
//! containment, using a minimal record-echo handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fcgi_protocol::{Record, RecordType};
use fcgi_transport::{ConnectionHandler, Service, ServiceConfig, ServiceError, Transceiver};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Echoes every record back as STDOUT until the peer closes. A record with
/// request id 666 makes the handler panic.
#[derive(Default)]
struct EchoHandler {
    served: AtomicUsize,
}

impl ConnectionHandler for EchoHandler {
    async fn handle_connection(
        &self,
        mut transceiver: Transceiver,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.served.fetch_add(1, Ordering::SeqCst);
        loop {
            let record = match transceiver.receive().await {
                Ok(r) => r,
                Err(e) if e.is_closed() => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if record.request_id == 666 {
                panic!("handler blew up");
            }
            transceiver
                .send(RecordType::Stdout, record.request_id, &record.content)
                .await?;
        }
    }
}

fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_address: "127.0.0.1:0".into(),
        worker_count: 2,
        accept_queue_depth: 16,
        io_timeout: Duration::from_secs(5),
    }
}

async fn roundtrip(stream: TcpStream, request_id: u16, payload: &[u8]) -> (Record, Transceiver) {
    let mut client = Transceiver::new(stream, Duration::from_secs(5));
    client.send(RecordType::Stdin, request_id, payload).await.unwrap();
    let reply = timeout(Duration::from_secs(5), client.receive())
        .await
        .expect("Timeout waiting for echo")
        .unwrap();
    (reply, client)
}

#[tokio::test]
async fn run_then_shutdown() {
    let service = Service::new(EchoHandler::default());
    let addr = service.run(test_config()).await.unwrap();
    assert!(service.is_running());
    assert_eq!(service.local_addr(), Some(addr));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reply, client) = roundtrip(stream, 5, b"ping").await;
    assert_eq!(reply.record_type, RecordType::Stdout);
    assert_eq!(reply.request_id, 5);
    assert_eq!(&reply.content[..], b"ping");
    drop(client);

    service.shutdown().await;
    assert!(!service.is_running());
    assert_eq!(service.local_addr(), None);
    assert!(TcpStream::connect(addr).await.is_err());

    // Idempotent
    service.shutdown().await;
    assert!(!service.is_running());
}

#[tokio::test]
async fn second_run_is_refused() {
    let service = Service::new(EchoHandler::default());
    let addr = service.run(test_config()).await.unwrap();

    let err = service.run(test_config()).await.unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyRunning));
    assert_eq!(service.local_addr(), Some(addr));

    service.shutdown().await;
}

#[tokio::test]
async fn bad_address_leaves_service_stopped() {
    let service = Service::new(EchoHandler::default());
    let config = ServiceConfig {
        listen_address: "not-an-address".into(),
        ..test_config()
    };
    let err = service.run(config).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidAddress { .. }));
    assert!(!service.is_running());

    // Can still start afterwards
    service.run(test_config()).await.unwrap();
    service.shutdown().await;
}

#[tokio::test]
async fn connections_beyond_pool_wait_their_turn() {
    let service = Service::new(EchoHandler::default());
    let addr = service.run(test_config()).await.unwrap();

    // Two workers are held by idle connections
    let (_, held_a) = roundtrip(TcpStream::connect(addr).await.unwrap(), 1, b"a").await;
    let (_, held_b) = roundtrip(TcpStream::connect(addr).await.unwrap(), 2, b"b").await;
    assert_eq!(service.active_connections(), 2);

    // A third connection is queued, not served
    let mut waiting = Transceiver::new(TcpStream::connect(addr).await.unwrap(), Duration::from_secs(5));
    waiting.send(RecordType::Stdin, 3, b"c").await.unwrap();
    assert!(timeout(Duration::from_millis(200), waiting.receive()).await.is_err());

    // Freeing a worker lets it through
    drop(held_a);
    let reply = timeout(Duration::from_secs(5), waiting.receive())
        .await
        .expect("queued connection was never served")
        .unwrap();
    assert_eq!(&reply.content[..], b"c");

    drop(held_b);
    drop(waiting);
    service.shutdown().await;
}

#[tokio::test]
async fn panicking_connection_does_not_affect_others() {
    let service = Service::new(EchoHandler::default());
    let addr = service.run(test_config()).await.unwrap();

    let mut doomed = Transceiver::new(TcpStream::connect(addr).await.unwrap(), Duration::from_secs(5));
    doomed.send(RecordType::Stdin, 666, b"boom").await.unwrap();
    let err = timeout(Duration::from_secs(5), doomed.receive()).await.unwrap().unwrap_err();
    assert!(err.is_closed() || matches!(err, fcgi_transport::TransportError::Io(_)));

    // The listener and the pool are still healthy
    let (reply, client) = roundtrip(TcpStream::connect(addr).await.unwrap(), 7, b"still here").await;
    assert_eq!(&reply.content[..], b"still here");
    assert!(service.is_running());

    drop(client);
    service.shutdown().await;
    assert!(service.handler().served.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_connections() {
    let service = Arc::new(Service::new(EchoHandler::default()));
    let addr = service.run(test_config()).await.unwrap();
    let (_, client) = roundtrip(TcpStream::connect(addr).await.unwrap(), 1, b"x").await;

    let stopping = {
        let service = service.clone();
        tokio::spawn(async move { service.shutdown().await })
    };

    // Listener goes away promptly
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(addr).await.is_err());
    assert!(!stopping.is_finished());

    // Teardown completes once the last connection ends
    drop(client);
    timeout(Duration::from_secs(5), stopping).await.unwrap().unwrap();
    assert!(!service.is_running());
    assert_eq!(service.active_connections(), 0);
}
