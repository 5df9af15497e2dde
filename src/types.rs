//! Core types used throughout rmlink.

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Hardware (MAC) address of an RM device.
///
/// The wire format carries the address byte-reversed; accessors exist for
/// both orders so call sites state which one they mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Build from the byte-reversed order used inside packets.
    pub fn from_reversed(bytes: [u8; 6]) -> Self {
        let mut mac = bytes;
        mac.reverse();
        Self(mac)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// The byte-reversed order used inside packets.
    pub fn reversed(&self) -> [u8; 6] {
        let mut mac = self.0;
        mac.reverse();
        mac
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl std::str::FromStr for Mac {
    type Err = ProtocolError;

    /// Parse the colon-separated form `Display` produces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts
                .next()
                .ok_or(ProtocolError::MalformedPayload("MAC address"))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| ProtocolError::MalformedPayload("MAC address"))?;
        }
        if parts.next().is_some() {
            return Err(ProtocolError::MalformedPayload("MAC address"));
        }
        Ok(Self(bytes))
    }
}

/// 4-byte session handle issued by the device on authentication.
///
/// All-zero until the authentication reply installs the real value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceId(pub [u8; 4]);

impl DeviceId {
    pub const ZERO: Self = Self([0; 4]);

    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 4]
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// 16-bit per-session request counter.
///
/// Incremented modulo 0x10000 on every outgoing request; the post-increment
/// value goes into the packet header.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU16);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    /// Increment and return the new value. Wraps at 0xFFFF.
    pub fn next(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub fn current(&self) -> u16 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Feature set a device kind advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Can transmit captured infrared codes.
    pub infrared: bool,
    /// Can capture and transmit RF (315/433 MHz) codes.
    pub rf: bool,
    /// Carries an ambient temperature sensor.
    pub temperature: bool,
}

/// Known RM device kinds, tagged by the 16-bit type code a device reports
/// during discovery. Capabilities are data on the variant, matched at the
/// call sites that gate RF/temperature commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Rm2,
    RmMini3,
    RmProPhicomm,
    Rm2HomePlus,
    Rm2ProPlus,
    RmMiniShate,
    /// A type code outside the known table; treated as IR-only.
    Unknown(u16),
}

impl DeviceKind {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x2712 => Self::Rm2,
            0x2737 => Self::RmMini3,
            0x273d => Self::RmProPhicomm,
            0x277c => Self::Rm2HomePlus,
            0x272a => Self::Rm2ProPlus,
            0x278f => Self::RmMiniShate,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::Rm2 => 0x2712,
            Self::RmMini3 => 0x2737,
            Self::RmProPhicomm => 0x273d,
            Self::Rm2HomePlus => 0x277c,
            Self::Rm2ProPlus => 0x272a,
            Self::RmMiniShate => 0x278f,
            Self::Unknown(code) => *code,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::Rm2 | Self::RmProPhicomm | Self::Rm2HomePlus => Capabilities {
                infrared: true,
                rf: false,
                temperature: true,
            },
            Self::Rm2ProPlus => Capabilities {
                infrared: true,
                rf: true,
                temperature: true,
            },
            Self::RmMini3 | Self::RmMiniShate | Self::Unknown(_) => Capabilities {
                infrared: true,
                rf: false,
                temperature: false,
            },
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rm2 => write!(f, "RM2"),
            Self::RmMini3 => write!(f, "RM Mini 3"),
            Self::RmProPhicomm => write!(f, "RM Pro (Phicomm)"),
            Self::Rm2HomePlus => write!(f, "RM2 Home Plus"),
            Self::Rm2ProPlus => write!(f, "RM2 Pro Plus"),
            Self::RmMiniShate => write!(f, "RM Mini (Shate)"),
            Self::Unknown(code) => write!(f, "unknown ({code:#06x})"),
        }
    }
}

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Identity known, no session key.
    Created,
    /// Receive loop running, handshake request sent.
    Authenticating,
    /// Session id and key installed.
    Ready,
    /// At least one command has been exchanged.
    Active,
    /// Terminal; transport released.
    Closed,
}

impl SessionPhase {
    /// True once the device has issued a session id and key.
    pub fn is_established(self) -> bool {
        matches!(self, Self::Ready | Self::Active)
    }
}

/// Typed notifications raised by a session's receive loop.
///
/// Fire-and-forget broadcast: an event reaches whatever subscribers exist at
/// the moment of dispatch and is never queued for later ones.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Authentication reply processed; session id and key installed.
    Ready,
    /// The device acknowledged a command.
    Ack,
    /// The device returned a captured code or other data payload.
    Data(Vec<u8>),
    /// Ambient temperature report, in degrees Celsius.
    Temperature(f32),
    /// The session closed or the receive loop hit a fatal transport error.
    Disconnected,
}
