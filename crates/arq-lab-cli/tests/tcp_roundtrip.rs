use arq_lab_cli::session::{self, ClientOptions};
use arq_lab_core::{ArqConfig, JoinPolicy};
use std::time::Duration;
use tokio::net::TcpListener;

async fn loopback() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

fn client(window_size: usize) -> ClientOptions {
    ClientOptions {
        config: ArqConfig {
            window_size,
            timeout: Duration::from_millis(500),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn message_crosses_loopback() {
    let (listener, addr) = loopback().await;
    let server_config = ArqConfig {
        max_segment_size: 5,
        ..Default::default()
    };
    let message = b"Sliding windows over a real socket";
    let client_config = client(3);

    let (served, sent) = tokio::join!(
        session::serve_one(listener, &server_config),
        session::send_message(addr.as_str(), message, &client_config),
    );
    let served = served.unwrap();
    let sent = sent.unwrap();

    assert_eq!(served.message.unwrap(), message);
    assert_eq!(sent.max_segment_size, 5);
    assert_eq!(sent.stats.segments, message.len().div_ceil(5));
    assert_eq!(served.stats.acks_sent, sent.stats.segments as u64);
}

#[tokio::test]
async fn client_cap_beats_the_handshake() {
    let (listener, addr) = loopback().await;
    let server_config = ArqConfig {
        max_segment_size: 100,
        join: JoinPolicy::SpaceSeparated,
        ..Default::default()
    };
    let options = ClientOptions {
        max_segment_size: Some(2),
        quote: true,
        ..client(4)
    };

    let (served, sent) = tokio::join!(
        session::serve_one(listener, &server_config),
        session::send_message(addr.as_str(), b"abcd", &options),
    );

    assert_eq!(sent.unwrap().max_segment_size, 2);
    // "\"abcd\"" in 2-byte segments, joined with spaces.
    assert_eq!(served.unwrap().message.unwrap(), b"\"a bc d\"");
}

#[tokio::test]
async fn early_hangup_reports_the_gap() {
    let (listener, addr) = loopback().await;
    let config = ArqConfig::default();

    let (served, ()) = tokio::join!(session::serve_one(listener, &config), async {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr.as_str()).await.unwrap();
        let mut handshake = [0u8; 6];
        stream.read_exact(&mut handshake).await.unwrap();
        assert_eq!(&handshake, b"10000\n");
        stream.write_all(b"M1:late\n").await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let served = served.unwrap();
    assert_eq!(served.message, Err(0));
    assert_eq!(served.stats.segments_received, 1);
    assert_eq!(served.stats.acks_sent, 0);
}

#[tokio::test]
async fn hangup_with_unread_acks_keeps_the_message() {
    let (listener, addr) = loopback().await;
    let config = ArqConfig::default();

    let (served, ()) = tokio::join!(session::serve_one(listener, &config), async {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr.as_str()).await.unwrap();
        let mut handshake = [0u8; 6];
        stream.read_exact(&mut handshake).await.unwrap();
        stream.write_all(b"M0:abcd\nM0:abcd\n").await.unwrap();
        let mut ack = [0u8; 5];
        stream.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack, b"ACK0\n");
        // The second ACK0 is left unread, so dropping the socket resets it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(stream);
    });

    let served = served.unwrap();
    assert_eq!(served.message, Ok(b"abcd".to_vec()));
    assert_eq!(served.stats.segments_received, 2);
}
