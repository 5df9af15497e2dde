//! Session behavior against a simulated RM device on loopback UDP, plus an
//! in-memory transport double for packet-layout and gating checks.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use rmlink::config::ClientConfig;
use rmlink::crypto::{CryptoSession, BOOTSTRAP_KEY, KEY_SIZE};
use rmlink::error::{Error, Result};
use rmlink::protocol::{
    self, commands, HEADER_SIZE, MAGIC, REQUEST_AUTH, REQUEST_COMMAND, RESPONSE_AUTH,
    RESPONSE_COMMAND, RESPONSE_DATA, RESPONSE_TEMPERATURE,
};
use rmlink::session::DeviceSession;
use rmlink::transport::Transport;
use rmlink::{DeviceKind, Mac, SessionEvent, SessionPhase};

fn test_mac() -> Mac {
    Mac::new([0xb4, 0x43, 0x0d, 0x01, 0x02, 0x03])
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Encrypt `payload` under `key` and frame it the way a device frames
/// replies. `error_code` lands at 0x22, the reply type at 0x26.
fn device_reply(response_type: u8, error_code: u16, payload: &[u8], key: &[u8; KEY_SIZE]) -> Vec<u8> {
    let mut header = vec![0u8; HEADER_SIZE];
    header[0x22..0x24].copy_from_slice(&error_code.to_le_bytes());
    header[0x26] = response_type;
    let ciphertext = CryptoSession::with_key(*key).encrypt(payload);
    let mut packet = protocol::combine(&header, &ciphertext);
    protocol::finalize_packet(&mut packet);
    packet
}

/// Handshake half of the fake device: consume one auth request, verify it
/// decrypts under the bootstrap key, and hand back a fresh key and id.
async fn answer_handshake(
    socket: &UdpSocket,
    issued_id: [u8; 4],
    issued_key: [u8; KEY_SIZE],
) -> SocketAddr {
    let mut buf = vec![0u8; 2048];
    let (len, from) = socket.recv_from(&mut buf).await.unwrap();
    let packet = &buf[..len];

    assert_eq!(&packet[0x00..0x04], &MAGIC);
    assert_eq!(&packet[0x04..0x08], &MAGIC);
    assert_eq!(packet[0x26], REQUEST_AUTH);

    let plain = CryptoSession::new().decrypt(&packet[HEADER_SIZE..]).unwrap();
    assert_eq!(plain.len(), 0x50);
    assert_eq!(&plain[0x30..0x36], b"rmlink");

    let mut payload = vec![0u8; 0x14];
    payload[..4].copy_from_slice(&issued_id);
    payload[4..0x14].copy_from_slice(&issued_key);
    let reply = device_reply(RESPONSE_AUTH, 0, &payload, &BOOTSTRAP_KEY);
    socket.send_to(&reply, from).await.unwrap();
    from
}

async fn established_session(
    device: SocketAddr,
    kind: DeviceKind,
    config: ClientConfig,
) -> DeviceSession {
    let session = DeviceSession::connect(test_mac(), kind, device, loopback(), config)
        .await
        .unwrap();
    session.authenticate().await.unwrap();
    session.wait_ready().await.unwrap();
    session
}

#[tokio::test]
async fn authentication_installs_device_issued_id_and_key() {
    let device = UdpSocket::bind(loopback()).await.unwrap();
    let device_addr = device.local_addr().unwrap();

    let issued_id = [0x00, 0x01, 0x02, 0x03];
    let issued_key = [0x5a; KEY_SIZE];

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1);
    let fake = tokio::spawn(async move {
        answer_handshake(&device, issued_id, issued_key).await;
        let mut buf = vec![0u8; 2048];
        let (len, _) = device.recv_from(&mut buf).await.unwrap();
        tx.send(buf[..len].to_vec()).await.unwrap();
    });

    let session =
        established_session(device_addr, DeviceKind::Rm2ProPlus, ClientConfig::default()).await;
    assert_eq!(session.phase(), SessionPhase::Ready);
    assert_eq!(session.device_id().as_bytes(), &issued_id);

    session.begin_learning().await.unwrap();
    let packet = rx.recv().await.unwrap();
    fake.await.unwrap();

    // Post-handshake traffic carries the issued id and encrypts under the
    // issued key, not the bootstrap one.
    assert_eq!(packet[0x26], REQUEST_COMMAND);
    assert_eq!(&packet[0x2a..0x30], &test_mac().reversed());
    assert_eq!(&packet[0x30..0x34], &issued_id);

    let plain = CryptoSession::with_key(issued_key)
        .decrypt(&packet[HEADER_SIZE..])
        .unwrap();
    assert_eq!(&plain[..3], &[0x04, 0x00, commands::BEGIN_LEARNING]);

    session.close().await;
}

#[tokio::test]
async fn ack_reply_resolves_wait_for_ack() {
    let device = UdpSocket::bind(loopback()).await.unwrap();
    let device_addr = device.local_addr().unwrap();
    let issued_key = [0x11; KEY_SIZE];

    let fake = tokio::spawn(async move {
        let client = answer_handshake(&device, [1, 2, 3, 4], issued_key).await;
        let mut buf = vec![0u8; 2048];
        device.recv_from(&mut buf).await.unwrap();
        // Give the client a moment to park its waiter before acking.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut ack = vec![0u8; 16];
        ack[0] = 0x04;
        let reply = device_reply(RESPONSE_COMMAND, 0, &ack, &issued_key);
        device.send_to(&reply, client).await.unwrap();
    });

    let session =
        established_session(device_addr, DeviceKind::RmMini3, ClientConfig::default()).await;
    session.cancel_learning().await.unwrap();
    session.wait_for_ack().await.unwrap();

    fake.await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn data_reply_resolves_wait_for_data_with_prefix_stripped() {
    let device = UdpSocket::bind(loopback()).await.unwrap();
    let device_addr = device.local_addr().unwrap();
    let issued_key = [0x22; KEY_SIZE];

    let fake = tokio::spawn(async move {
        let client = answer_handshake(&device, [9, 9, 9, 9], issued_key).await;
        // First inbound packet is the check-data poll; answer it with a code.
        let mut buf = vec![0u8; 2048];
        let (len, _) = device.recv_from(&mut buf).await.unwrap();
        let plain = CryptoSession::with_key(issued_key)
            .decrypt(&buf[HEADER_SIZE..len])
            .unwrap();
        assert_eq!(plain[2], commands::CHECK_DATA);

        let payload = [0x01, 0x00, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef];
        let reply = device_reply(RESPONSE_DATA, 0, &payload, &issued_key);
        device.send_to(&reply, client).await.unwrap();
    });

    let session =
        established_session(device_addr, DeviceKind::RmMini3, ClientConfig::default()).await;
    let data = session.wait_for_data().await.unwrap();
    // The four-byte reply preamble is stripped; block-cipher zero padding
    // may trail the code.
    assert_eq!(&data[..4], &[0xde, 0xad, 0xbe, 0xef]);
    assert!(data[4..].iter().all(|&b| b == 0));

    fake.await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn error_coded_reply_is_discarded_but_loop_survives() {
    let device = UdpSocket::bind(loopback()).await.unwrap();
    let device_addr = device.local_addr().unwrap();
    let issued_key = [0x33; KEY_SIZE];

    let fake = tokio::spawn(async move {
        let client = answer_handshake(&device, [4, 3, 2, 1], issued_key).await;
        let mut buf = vec![0u8; 2048];
        device.recv_from(&mut buf).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut ack = vec![0u8; 16];
        ack[0] = 0x04;
        // Error-coded copy first; the session must drop it and keep
        // listening for the clean one.
        let poisoned = device_reply(RESPONSE_COMMAND, 0xfff9, &ack, &issued_key);
        device.send_to(&poisoned, client).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let clean = device_reply(RESPONSE_COMMAND, 0, &ack, &issued_key);
        device.send_to(&clean, client).await.unwrap();
    });

    let session =
        established_session(device_addr, DeviceKind::RmMini3, ClientConfig::default()).await;
    session.begin_learning().await.unwrap();
    session.wait_for_ack().await.unwrap();

    fake.await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn temperature_reply_reaches_event_subscribers() {
    let device = UdpSocket::bind(loopback()).await.unwrap();
    let device_addr = device.local_addr().unwrap();
    let issued_key = [0x44; KEY_SIZE];

    let fake = tokio::spawn(async move {
        let client = answer_handshake(&device, [7, 7, 7, 7], issued_key).await;
        let mut buf = vec![0u8; 2048];
        device.recv_from(&mut buf).await.unwrap();

        let mut payload = vec![0u8; 16];
        payload[6] = 23;
        payload[7] = 5;
        let reply = device_reply(RESPONSE_TEMPERATURE, 0, &payload, &issued_key);
        device.send_to(&reply, client).await.unwrap();
    });

    let session =
        established_session(device_addr, DeviceKind::Rm2ProPlus, ClientConfig::default()).await;
    let mut events = session.events();
    session.check_temperature().await.unwrap();

    loop {
        match events.recv().await.unwrap() {
            SessionEvent::Temperature(celsius) => {
                assert!((celsius - 23.5).abs() < f32::EPSILON);
                break;
            }
            _ => continue,
        }
    }

    fake.await.unwrap();
    session.close().await;
}

/// Records every outbound packet and never yields an inbound one.
struct SpyTransport {
    sends: Mutex<Vec<Vec<u8>>>,
    send_count: AtomicUsize,
}

impl SpyTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sends: Mutex::new(Vec::new()),
            send_count: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transport for SpyTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(loopback())
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        self.sends.lock().unwrap().push(data.to_vec());
        self.send_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn recv_one(&self) -> Result<Vec<u8>> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn capability_gate_blocks_before_any_send() {
    let spy = SpyTransport::new();
    let session = DeviceSession::new(
        test_mac(),
        DeviceKind::RmMini3,
        spy.clone(),
        ClientConfig::default(),
    );

    let err = session.check_rf_data().await.unwrap_err();
    assert!(err.is_capability());
    let err = session.check_temperature().await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedCapability { .. }));

    assert!(spy.sends.lock().unwrap().is_empty());
}

#[tokio::test]
async fn command_packet_layout_and_checksums() {
    let spy = SpyTransport::new();
    let session = DeviceSession::new(
        test_mac(),
        DeviceKind::Rm2,
        spy.clone(),
        ClientConfig::default(),
    );

    session.begin_learning().await.unwrap();
    session.cancel_learning().await.unwrap();

    let sends = spy.sends.lock().unwrap();
    assert_eq!(sends.len(), 2);
    let packet = &sends[0];

    assert_eq!(&packet[0x00..0x04], &MAGIC);
    assert_eq!(&packet[0x04..0x08], &MAGIC);
    assert_eq!(packet[0x24], 0x2a);
    assert_eq!(packet[0x25], 0x27);
    assert_eq!(packet[0x26], REQUEST_COMMAND);
    assert_eq!(&packet[0x2a..0x30], &test_mac().reversed());
    // No handshake has run, so the id slot is still zeroed and the payload
    // encrypts under the bootstrap key.
    assert_eq!(&packet[0x30..0x34], &[0, 0, 0, 0]);

    let plain = CryptoSession::new().decrypt(&packet[HEADER_SIZE..]).unwrap();
    assert_eq!(plain.len(), 16);
    assert_eq!(&plain[..3], &[0x04, 0x00, commands::BEGIN_LEARNING]);
    assert!(plain[3..].iter().all(|&b| b == 0));

    // Payload checksum covers the plaintext; the whole-packet checksum is
    // computed with its own slot zeroed.
    let stored_payload = u16::from_le_bytes([packet[0x34], packet[0x35]]);
    assert_eq!(stored_payload, protocol::checksum(&plain));

    let stored_packet = u16::from_le_bytes([packet[0x20], packet[0x21]]);
    let mut unsummed = packet.clone();
    unsummed[0x20] = 0;
    unsummed[0x21] = 0;
    assert_eq!(stored_packet, protocol::checksum(&unsummed));

    // Sequence numbers advance per request.
    let first = u16::from_le_bytes([sends[0][0x28], sends[0][0x29]]);
    let second = u16::from_le_bytes([sends[1][0x28], sends[1][0x29]]);
    assert_eq!(second, first.wrapping_add(1));
}

#[tokio::test(start_paused = true)]
async fn wait_for_data_polls_until_deadline() {
    let spy = SpyTransport::new();
    let mut config = ClientConfig::default();
    config.poll_interval = Duration::from_millis(100);
    config.data_timeout = Duration::from_millis(450);
    let session = DeviceSession::new(test_mac(), DeviceKind::RmMini3, spy.clone(), config);

    let err = session.wait_for_data().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    // Immediate first poll plus one per interval until the deadline.
    let polls = spy.send_count.load(Ordering::SeqCst);
    assert!(polls >= 4, "expected repeated polling, saw {polls}");
    for packet in spy.sends.lock().unwrap().iter() {
        let plain = CryptoSession::new().decrypt(&packet[HEADER_SIZE..]).unwrap();
        assert_eq!(plain[2], commands::CHECK_DATA);
    }
}

#[tokio::test(start_paused = true)]
async fn wait_for_ack_times_out_without_a_reply() {
    let spy = SpyTransport::new();
    let mut config = ClientConfig::default();
    config.ack_timeout = Duration::from_millis(200);
    let session = DeviceSession::new(test_mac(), DeviceKind::RmMini3, spy.clone(), config);

    session.begin_learning().await.unwrap();
    let err = session.wait_for_ack().await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(spy.send_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn close_emits_disconnected_and_rejects_sends() {
    let spy = SpyTransport::new();
    let session = DeviceSession::new(
        test_mac(),
        DeviceKind::RmMini3,
        spy.clone(),
        ClientConfig::default(),
    );

    let mut events = session.events();
    session.close().await;
    assert_eq!(session.phase(), SessionPhase::Closed);
    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::Disconnected
    ));

    let err = session.check_data().await.unwrap_err();
    assert!(matches!(err, Error::Closed));

    // A second close is a no-op.
    session.close().await;
}
