//! Session lifecycle, command pacing and dispatch against a mock device.

use std::time::{Duration, Instant};

use eiscp::{
    encode_frame, ConnectOptions, ConnectionState, EiscpError, EiscpSession, Event,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn connect_options(port: u16) -> ConnectOptions {
    ConnectOptions {
        host: Some("127.0.0.1".to_string()),
        port: Some(port),
        model: Some("TX-TEST".to_string()),
        send_delay: Some(Duration::from_millis(20)),
        ..ConnectOptions::default()
    }
}

async fn wait_for(events: &mut broadcast::Receiver<Event>, want: fn(&Event) -> bool) -> Event {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if want(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn push_writes_exact_frame_bytes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let expected = encode_frame("PWR01").unwrap();
    let expected_len = expected.len();
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; expected_len];
        sock.read_exact(&mut buf).await.unwrap();
        buf
    });

    let session = EiscpSession::new();
    let mut events = session.subscribe();
    session.connect(connect_options(port)).await.unwrap();
    wait_for(&mut events, |e| matches!(e, Event::Connect { .. })).await;

    session.raw("PWR01").await.unwrap();

    let wire = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(wire, expected.to_vec());
    // Header payload-length field matches the transmitted payload.
    let declared = u32::from_be_bytes(wire[8..12].try_into().unwrap()) as usize;
    assert_eq!(declared, wire.len() - 16);
    assert_eq!(&wire[16..], b"!1PWR01\r\n");

    session.disconnect();
}

#[tokio::test]
async fn consecutive_sends_are_spaced_by_send_delay() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let frame_len = encode_frame("PWR01").unwrap().len();
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; frame_len];
        sock.read_exact(&mut buf).await.unwrap();
        let first = Instant::now();
        sock.read_exact(&mut buf).await.unwrap();
        first.elapsed()
    });

    let session = EiscpSession::new();
    let mut events = session.subscribe();
    let mut options = connect_options(port);
    options.send_delay = Some(Duration::from_millis(200));
    session.connect(options).await.unwrap();
    wait_for(&mut events, |e| matches!(e, Event::Connect { .. })).await;

    // Queue both at once; the worker alone must enforce the spacing.
    let (a, b) = tokio::join!(session.raw("PWR01"), session.raw("MVL20"));
    a.unwrap();
    b.unwrap();

    let gap = timeout(WAIT, server).await.unwrap().unwrap();
    assert!(
        gap >= Duration::from_millis(150),
        "sends only {}ms apart",
        gap.as_millis()
    );

    session.disconnect();
}

#[tokio::test]
async fn send_while_disconnected_fails_fast_with_error_event() {
    let session = EiscpSession::new();
    let mut events = session.subscribe();

    let started = Instant::now();
    let result = session.raw("PWR01").await;
    assert!(matches!(result, Err(EiscpError::NotConnected)));
    assert!(started.elapsed() < Duration::from_millis(100));

    let event = wait_for(&mut events, |e| matches!(e, Event::Error(_))).await;
    let Event::Error(text) = event else {
        unreachable!()
    };
    assert!(text.contains("not connected"));
}

#[tokio::test]
async fn inbound_messages_reach_generic_and_per_code_subscribers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(&encode_frame("!1MVL42").unwrap())
            .await
            .unwrap();
        // Hold the connection open so the client does not see EOF early.
        let mut buf = [0u8; 64];
        let _ = sock.read(&mut buf).await;
    });

    let session = EiscpSession::new();
    let mut events = session.subscribe();
    let mut volume = session.subscribe_code("MVL");
    session.connect(connect_options(port)).await.unwrap();

    let event = wait_for(&mut events, |e| matches!(e, Event::Data(_))).await;
    let Event::Data(msg) = event else {
        unreachable!()
    };
    assert_eq!(msg.code, "MVL");
    assert_eq!(msg.argument, "42");
    assert_eq!(msg.raw, "MVL42");
    assert_eq!(msg.host, "127.0.0.1");
    assert_eq!(msg.port, port);
    assert_eq!(msg.model.as_deref(), Some("TX-TEST"));

    let argument = timeout(WAIT, volume.recv()).await.unwrap().unwrap();
    assert_eq!(argument, "42");

    session.disconnect();
}

#[tokio::test]
async fn reconnect_disabled_stays_down_after_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let session = EiscpSession::new();
    let mut events = session.subscribe();
    session.connect(connect_options(port)).await.unwrap();

    // Accept and immediately drop the connection.
    let (sock, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    drop(sock);

    wait_for(&mut events, |e| matches!(e, Event::Close)).await;

    // No further connection attempt arrives.
    let second = timeout(Duration::from_millis(500), listener.accept()).await;
    assert!(second.is_err(), "unexpected reconnect attempt");
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconnect_enabled_reattempts_after_delay() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let session = EiscpSession::new();
    let mut events = session.subscribe();
    let mut options = connect_options(port);
    options.reconnect = Some(true);
    options.reconnect_delay = Some(Duration::from_millis(100));
    session.connect(options).await.unwrap();

    let (sock, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let dropped_at = Instant::now();
    drop(sock);

    // The session comes back after roughly the configured delay.
    let (sock, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let waited = dropped_at.elapsed();
    assert!(
        waited >= Duration::from_millis(100),
        "reconnected after only {}ms",
        waited.as_millis()
    );
    wait_for(&mut events, |e| matches!(e, Event::Connect { .. })).await;

    drop(sock);
    session.disconnect();
}

#[tokio::test]
async fn connect_while_active_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let session = EiscpSession::new();
    let mut events = session.subscribe();
    session.connect(connect_options(port)).await.unwrap();
    wait_for(&mut events, |e| matches!(e, Event::Connect { .. })).await;

    let second = session.connect(connect_options(port)).await;
    assert!(matches!(second, Err(EiscpError::AlreadyConnected)));

    session.disconnect();
}

#[tokio::test]
async fn disconnect_closes_and_cancels_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let session = EiscpSession::new();
    let mut events = session.subscribe();
    let mut options = connect_options(port);
    options.reconnect = Some(true);
    options.reconnect_delay = Some(Duration::from_millis(50));
    session.connect(options).await.unwrap();
    wait_for(&mut events, |e| matches!(e, Event::Connect { .. })).await;

    session.disconnect();
    wait_for(&mut events, |e| matches!(e, Event::Close)).await;

    // Explicit disconnect wins over the reconnect flag.
    let listener_quiet = timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(listener_quiet.is_err(), "reconnect ran after disconnect");
    assert_eq!(session.state(), ConnectionState::Disconnected);

    let result = session.raw("PWR01").await;
    assert!(matches!(result, Err(EiscpError::NotConnected)));
}
