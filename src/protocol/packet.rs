//! Command/auth packet framing.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ProtocolError, Result};
use crate::types::{DeviceId, Mac};

use super::{checksum, HEADER_SIZE, MAGIC};

/// Header of an outgoing command or authentication packet.
///
/// `encode` leaves the whole-packet checksum field zero; call
/// [`finalize_packet`] once the ciphertext has been appended.
#[derive(Debug, Clone)]
pub struct PacketHeader {
    pub request_type: u8,
    pub sequence: u16,
    pub mac: Mac,
    pub device_id: DeviceId,
    /// Checksum of the *plaintext* payload, computed before encryption.
    pub payload_checksum: u16,
}

impl PacketHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0x00..0x04].copy_from_slice(&MAGIC);
        buf[0x04..0x08].copy_from_slice(&MAGIC);
        buf[0x24] = 0x2a;
        buf[0x25] = 0x27;
        buf[0x26] = self.request_type;
        LittleEndian::write_u16(&mut buf[0x28..0x2a], self.sequence);
        buf[0x2a..0x30].copy_from_slice(&self.mac.reversed());
        buf[0x30..0x34].copy_from_slice(self.device_id.as_bytes());
        LittleEndian::write_u16(&mut buf[0x34..0x36], self.payload_checksum);
        buf
    }
}

/// Write the whole-packet checksum into offset 0x20.
///
/// Must run last, over the finished packet: header bytes, payload checksum,
/// and ciphertext all final.
pub fn finalize_packet(packet: &mut [u8]) {
    debug_assert!(packet.len() >= HEADER_SIZE);
    let sum = checksum(packet);
    LittleEndian::write_u16(&mut packet[0x20..0x22], sum);
}

/// Parsed header of an inbound datagram.
#[derive(Debug, Clone, Copy)]
pub struct ResponseHeader {
    /// Nonzero means the device rejected the request this answers.
    pub error_code: u16,
    pub response_type: u8,
    pub sequence: u16,
}

impl ResponseHeader {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                len: buf.len(),
                min: HEADER_SIZE,
            }
            .into());
        }

        Ok(Self {
            error_code: LittleEndian::read_u16(&buf[0x22..0x24]),
            response_type: buf[0x26],
            sequence: LittleEndian::read_u16(&buf[0x28..0x2a]),
        })
    }
}

/// Ciphertext portion of an inbound datagram.
pub fn response_payload(buf: &[u8]) -> &[u8] {
    &buf[HEADER_SIZE.min(buf.len())..]
}
