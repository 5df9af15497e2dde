//! Wire protocol for RM devices.
//!
//! Two packet shapes exist: the 0x38-byte command/auth packet carrying an
//! AES-encrypted payload, and the 0x30-byte discovery hello. All multi-byte
//! fields are little-endian.
//!
//! ## Command packet header (0x38 bytes)
//!
//! ```text
//! 0x00  magic 5A A5 AA 55          0x24  const 2A      0x2a  MAC (reversed)
//! 0x04  magic 5A A5 AA 55          0x25  const 27      0x30  session id
//! 0x20  whole-packet checksum      0x26  request type  0x34  payload checksum
//! 0x22  error code (inbound)       0x28  sequence      0x38  ciphertext...
//! ```
//!
//! Both checksums are written last: the payload checksum over the plaintext
//! payload, the packet checksum over the finished packet with the payload
//! checksum already in place.

mod hello;
mod packet;

pub use hello::{build_hello, DiscoveryReply};
pub use packet::{finalize_packet, response_payload, PacketHeader, ResponseHeader};

/// Command/auth packet header size.
pub const HEADER_SIZE: usize = 0x38;

/// Discovery hello packet size.
pub const HELLO_SIZE: usize = 0x30;

/// Checksum seed shared by every packet shape in the family.
pub const CHECKSUM_SEED: u16 = 0xbeaf;

/// Magic marker, duplicated at offsets 0x00 and 0x04 of command packets.
pub const MAGIC: [u8; 4] = [0x5a, 0xa5, 0xaa, 0x55];

/// Request type: authentication handshake.
pub const REQUEST_AUTH: u8 = 0x65;
/// Request type: encrypted command or data.
pub const REQUEST_COMMAND: u8 = 0x6a;

/// Response type: authentication reply carrying session id and key.
pub const RESPONSE_AUTH: u8 = 0xe9;
/// Response type: command reply (ack or data).
pub const RESPONSE_COMMAND: u8 = 0xee;
/// Response type: data reply (ack or data).
pub const RESPONSE_DATA: u8 = 0xef;
/// Response type: unsolicited temperature report.
pub const RESPONSE_TEMPERATURE: u8 = 0x0a;

/// One-byte command opcodes placed at offset 2 of the 16-byte command payload.
pub mod commands {
    pub const CHECK_TEMPERATURE: u8 = 0x01;
    pub const BEGIN_LEARNING: u8 = 0x03;
    pub const CHECK_DATA: u8 = 0x04;
    pub const SWEEP_RF: u8 = 0x19;
    pub const CANCEL_LEARNING: u8 = 0x1e;
}

/// Additive 16-bit checksum: seed plus the byte sum, truncated once at the
/// end rather than per byte.
pub fn checksum(data: &[u8]) -> u16 {
    let sum = data
        .iter()
        .fold(u64::from(CHECKSUM_SEED), |acc, &b| acc + u64::from(b));
    (sum % 0x1_0000) as u16
}

/// Concatenate two byte buffers without mutating either input.
pub fn combine(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}
