//! Device session: request framing, the background receive loop, and the
//! typed event surface collaborators consume.
//!
//! One dedicated task per session runs the receive loop; all event dispatch
//! happens on that task. Send operations never wait for a reply; callers
//! that need one use [`DeviceSession::wait_for_ack`] or
//! [`DeviceSession::wait_for_data`]. The wire format carries no per-request
//! correlation id, so those waits consume the next event of their kind;
//! callers are expected to keep one outstanding request of a given kind at
//! a time.

mod waiters;

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::crypto::CryptoSession;
use crate::error::{Error, Result};
use crate::protocol::{
    checksum, combine, commands, finalize_packet, response_payload, PacketHeader, ResponseHeader,
    REQUEST_AUTH, REQUEST_COMMAND, RESPONSE_AUTH, RESPONSE_COMMAND, RESPONSE_DATA,
    RESPONSE_TEMPERATURE,
};
use crate::transport::{Transport, UdpTransport};
use crate::types::{DeviceId, DeviceKind, Mac, SequenceCounter, SessionEvent, SessionPhase};

use waiters::Waiters;

/// Command payloads are a fixed 16 bytes with the opcode at offset 2.
const COMMAND_PAYLOAD_SIZE: usize = 16;

/// Prefix on caller-supplied data payloads.
const DATA_PREFIX: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Leading bytes stripped from a data reply before it is surfaced.
const DATA_OFFSET: usize = 4;

/// Authentication payload size.
const AUTH_PAYLOAD_SIZE: usize = 0x50;

/// The fixed-content authentication payload. Mostly filler: the device's
/// handshake logic only reads the serial field, the two flag bytes, and the
/// client name.
fn build_auth_payload() -> [u8; AUTH_PAYLOAD_SIZE] {
    let mut payload = [0u8; AUTH_PAYLOAD_SIZE];
    payload[0x04..0x13].fill(0x31);
    payload[0x1e] = 0x01;
    payload[0x2d] = 0x01;
    payload[0x30..0x36].copy_from_slice(b"rmlink");
    payload
}

struct SessionInner {
    mac: Mac,
    kind: DeviceKind,
    transport: Arc<dyn Transport>,
    crypto: CryptoSession,
    device_id: RwLock<DeviceId>,
    phase: RwLock<SessionPhase>,
    sequence: SequenceCounter,
    /// Serializes `send_request` so concurrent callers cannot interleave
    /// the sequence increment and checksum steps.
    send_gate: tokio::sync::Mutex<()>,
    waiters: Mutex<Waiters>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: broadcast::Sender<()>,
    config: ClientConfig,
}

/// An authenticated (or authenticating) session with one RM device.
///
/// Created once per discovered or known device, authenticated once, used
/// for any number of command/response cycles, and closed exactly once.
pub struct DeviceSession {
    inner: Arc<SessionInner>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSession {
    /// Build a session over an existing transport.
    pub fn new(
        mac: Mac,
        kind: DeviceKind,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        let (shutdown, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(SessionInner {
                mac,
                kind,
                transport,
                crypto: CryptoSession::new(),
                device_id: RwLock::new(DeviceId::ZERO),
                phase: RwLock::new(SessionPhase::Created),
                sequence: SequenceCounter::new(),
                send_gate: tokio::sync::Mutex::new(()),
                waiters: Mutex::new(Waiters::default()),
                events,
                shutdown,
                config,
            }),
            loop_handle: Mutex::new(None),
        }
    }

    /// Bind a UDP socket on `bind_addr` and build a session targeting the
    /// device at `remote`.
    pub async fn connect(
        mac: Mac,
        kind: DeviceKind,
        remote: SocketAddr,
        bind_addr: SocketAddr,
        config: ClientConfig,
    ) -> Result<Self> {
        let transport = UdpTransport::connect(remote, bind_addr).await?;
        Ok(Self::new(mac, kind, Arc::new(transport), config))
    }

    pub fn mac(&self) -> Mac {
        self.inner.mac
    }

    pub fn kind(&self) -> DeviceKind {
        self.inner.kind
    }

    /// Session id issued by the device; zero until authenticated.
    pub fn device_id(&self) -> DeviceId {
        *self.inner.device_id.read()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase.read()
    }

    /// Subscribe to session events. Events are broadcast fire-and-forget;
    /// a subscriber that lags far enough behind loses the oldest events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Start the background receive loop and send the handshake request
    /// under the bootstrap key.
    ///
    /// Returns once the send completes; readiness is observed through the
    /// [`SessionEvent::Ready`] event or [`Self::wait_ready`].
    pub async fn authenticate(&self) -> Result<()> {
        {
            let mut phase = self.inner.phase.write();
            match *phase {
                SessionPhase::Created => *phase = SessionPhase::Authenticating,
                SessionPhase::Closed => return Err(Error::Closed),
                _ => return Err(Error::Session("already authenticated".into())),
            }
        }

        // The loop must be running before the handshake goes out or the
        // reply would be lost.
        self.spawn_receive_loop();
        self.inner
            .send_request(REQUEST_AUTH, &build_auth_payload())
            .await
    }

    /// Wait until the device has issued a session id and key.
    pub async fn wait_ready(&self) -> Result<()> {
        // Subscribe before checking the phase so the Ready event cannot
        // slip between the check and the wait.
        let mut events = self.inner.events.subscribe();
        if self.phase().is_established() {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        tokio::time::timeout(self.inner.config.ready_timeout, async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Ready) => return Ok(()),
                    Ok(SessionEvent::Disconnected) => return Err(Error::Closed),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if inner.phase.read().is_established() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::Closed),
                }
            }
        })
        .await
        .map_err(|_| Error::Timeout("authentication"))?
    }

    /// Send a one-byte command opcode in the fixed 16-byte payload.
    pub async fn send_command(&self, opcode: u8) -> Result<()> {
        let mut payload = [0u8; COMMAND_PAYLOAD_SIZE];
        payload[0] = 0x04;
        payload[2] = opcode;
        self.inner.send_request(REQUEST_COMMAND, &payload).await?;
        self.inner.mark_active();
        Ok(())
    }

    /// Send a captured code (or other raw payload) to the device.
    pub async fn send_data(&self, data: &[u8]) -> Result<()> {
        let payload = combine(&DATA_PREFIX, data);
        self.inner.send_request(REQUEST_COMMAND, &payload).await?;
        self.inner.mark_active();
        Ok(())
    }

    /// Put the device into IR learning mode.
    pub async fn begin_learning(&self) -> Result<()> {
        self.send_command(commands::BEGIN_LEARNING).await
    }

    /// Leave learning mode without capturing.
    pub async fn cancel_learning(&self) -> Result<()> {
        self.send_command(commands::CANCEL_LEARNING).await
    }

    /// Ask the device for the last captured code.
    pub async fn check_data(&self) -> Result<()> {
        self.send_command(commands::CHECK_DATA).await
    }

    /// Ask for an RF capture. Gated: fails fast with no I/O on device
    /// kinds without RF support.
    pub async fn check_rf_data(&self) -> Result<()> {
        self.inner.require("RF", self.inner.kind.capabilities().rf)?;
        self.send_command(commands::SWEEP_RF).await
    }

    /// Ask for a temperature report. Gated like [`Self::check_rf_data`].
    pub async fn check_temperature(&self) -> Result<()> {
        self.inner
            .require("temperature", self.inner.kind.capabilities().temperature)?;
        self.send_command(commands::CHECK_TEMPERATURE).await
    }

    /// Complete on the next acknowledgement, bounded by the configured ack
    /// timeout. Does not resend.
    pub async fn wait_for_ack(&self) -> Result<()> {
        let rx = self.inner.waiters.lock().register_ack();
        match tokio::time::timeout(self.inner.config.ack_timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => Err(Error::Timeout("acknowledgement wait")),
        }
    }

    /// Complete with the next data payload.
    ///
    /// While pending, re-issues a check-data command every
    /// `poll_interval` (first query goes out immediately) to coax a reply
    /// out of the device, since UDP gives no delivery guarantee. Bounded by
    /// the configured data timeout. The payload may carry trailing zero
    /// padding from the block cipher.
    pub async fn wait_for_data(&self) -> Result<Vec<u8>> {
        let mut rx = self.inner.waiters.lock().register_data();

        let deadline = tokio::time::Instant::now() + self.inner.config.data_timeout;
        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);
        let mut poll = tokio::time::interval(self.inner.config.poll_interval);

        loop {
            tokio::select! {
                result = &mut rx => return result.map_err(|_| Error::Closed),
                _ = poll.tick() => self.check_data().await?,
                _ = &mut expired => return Err(Error::Timeout("data wait")),
            }
        }
    }

    /// Enter learning mode and wait for the captured code.
    pub async fn learn(&self) -> Result<Vec<u8>> {
        self.begin_learning().await?;
        self.wait_for_data().await
    }

    /// Stop the receive loop, abandon pending waits, and emit
    /// [`SessionEvent::Disconnected`]. Idempotent; no further sends are
    /// permitted afterward.
    pub async fn close(&self) {
        {
            let mut phase = self.inner.phase.write();
            if *phase == SessionPhase::Closed {
                return;
            }
            *phase = SessionPhase::Closed;
        }

        let _ = self.inner.shutdown.send(());
        self.inner.waiters.lock().abandon();
        let _ = self.inner.events.send(SessionEvent::Disconnected);

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        debug!(mac = %self.inner.mac, "session closed");
    }

    fn spawn_receive_loop(&self) {
        let inner = Arc::clone(&self.inner);
        let mut shutdown = inner.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = inner.transport.recv_one() => match result {
                        Ok(datagram) => inner.handle_datagram(&datagram),
                        Err(e) => {
                            debug!(error = %e, "receive loop stopped by transport");
                            if *inner.phase.read() != SessionPhase::Closed {
                                let _ = inner.events.send(SessionEvent::Disconnected);
                            }
                            break;
                        }
                    },
                    _ = shutdown.recv() => break,
                }
            }
        });
        *self.loop_handle.lock() = Some(handle);
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(handle) = self.loop_handle.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("mac", &self.inner.mac)
            .field("kind", &self.inner.kind)
            .field("phase", &self.phase())
            .field("device_id", &self.device_id())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    /// Frame, encrypt, checksum, and transmit one request.
    async fn send_request(&self, request_type: u8, plaintext: &[u8]) -> Result<()> {
        if *self.phase.read() == SessionPhase::Closed {
            return Err(Error::Closed);
        }

        let _gate = self.send_gate.lock().await;

        let header = PacketHeader {
            request_type,
            sequence: self.sequence.next(),
            mac: self.mac,
            device_id: *self.device_id.read(),
            payload_checksum: checksum(plaintext),
        };

        let ciphertext = self.crypto.encrypt(plaintext);
        let mut packet = combine(&header.encode(), &ciphertext);
        finalize_packet(&mut packet);

        trace!(
            request_type,
            sequence = header.sequence,
            len = packet.len(),
            "sending request"
        );
        self.transport.send(&packet).await
    }

    fn require(&self, capability: &'static str, supported: bool) -> Result<()> {
        if supported {
            Ok(())
        } else {
            Err(Error::UnsupportedCapability {
                kind: self.kind,
                capability,
            })
        }
    }

    fn mark_active(&self) {
        let mut phase = self.phase.write();
        if *phase == SessionPhase::Ready {
            *phase = SessionPhase::Active;
        }
    }

    /// Classify one inbound datagram. Every failure here discards only
    /// this datagram; the loop keeps listening.
    fn handle_datagram(&self, datagram: &[u8]) {
        let header = match ResponseHeader::decode(datagram) {
            Ok(header) => header,
            Err(_) => {
                trace!(len = datagram.len(), "discarding runt datagram");
                return;
            }
        };

        if header.error_code != 0 {
            trace!(
                code = header.error_code,
                response_type = header.response_type,
                "device reported an error; dropping reply"
            );
            return;
        }

        let payload = match self.crypto.decrypt(response_payload(datagram)) {
            Ok(payload) => payload,
            Err(e) => {
                trace!(error = %e, "undecryptable payload; dropping datagram");
                return;
            }
        };

        match header.response_type {
            RESPONSE_AUTH => self.handle_auth_reply(&payload),
            RESPONSE_COMMAND | RESPONSE_DATA => self.handle_command_reply(&payload),
            RESPONSE_TEMPERATURE => self.handle_temperature(&payload),
            other => trace!(response_type = other, "unhandled response type"),
        }
    }

    fn handle_auth_reply(&self, payload: &[u8]) {
        if payload.len() < 0x14 {
            trace!(len = payload.len(), "short authentication reply; dropping");
            return;
        }

        let mut id = [0u8; 4];
        id.copy_from_slice(&payload[..0x04]);
        let mut key = [0u8; 16];
        key.copy_from_slice(&payload[0x04..0x14]);

        *self.device_id.write() = DeviceId::new(id);
        self.crypto.set_key(key);
        {
            let mut phase = self.phase.write();
            if *phase == SessionPhase::Authenticating {
                *phase = SessionPhase::Ready;
            }
        }

        debug!(device_id = %DeviceId::new(id), "session key installed");
        let _ = self.events.send(SessionEvent::Ready);
    }

    fn handle_command_reply(&self, payload: &[u8]) {
        match payload.first() {
            Some(&0x04) => {
                self.waiters.lock().complete_ack();
                let _ = self.events.send(SessionEvent::Ack);
            }
            Some(_) if payload.len() > DATA_OFFSET => {
                let data = payload[DATA_OFFSET..].to_vec();
                self.waiters.lock().complete_data(&data);
                let _ = self.events.send(SessionEvent::Data(data));
            }
            _ => trace!(len = payload.len(), "empty command reply; dropping"),
        }
    }

    fn handle_temperature(&self, payload: &[u8]) {
        if payload.len() < 8 {
            trace!(len = payload.len(), "short temperature report; dropping");
            return;
        }
        let celsius = (f32::from(payload[6]) * 10.0 + f32::from(payload[7])) / 10.0;
        let _ = self.events.send(SessionEvent::Temperature(celsius));
    }
}
