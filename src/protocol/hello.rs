//! Discovery hello packet and reply parsing.

use std::net::SocketAddrV4;

use byteorder::{ByteOrder, LittleEndian};
use chrono::{Datelike, Local, Timelike};

use crate::error::{ProtocolError, Result};
use crate::types::Mac;

use super::{checksum, HELLO_SIZE};

/// Discovery replies carry the type code at 0x34 and the reversed MAC at
/// 0x3a, so a valid reply is at least this long.
const REPLY_MIN_SIZE: usize = 0x40;

/// Build the 0x30-byte hello packet broadcast during discovery.
///
/// Embeds the local clock and timezone, the address and port the scanner is
/// bound to, and the fixed discovery opcode. The device echoes a reply to
/// that address.
pub fn build_hello(local: SocketAddrV4) -> [u8; HELLO_SIZE] {
    let now = Local::now();
    let tz_hours = now.offset().local_minus_utc() / 3600;

    let mut buf = [0u8; HELLO_SIZE];
    LittleEndian::write_i32(&mut buf[0x08..0x0c], tz_hours);
    LittleEndian::write_u16(&mut buf[0x0c..0x0e], now.year() as u16);
    buf[0x0e] = now.minute() as u8;
    buf[0x0f] = now.hour() as u8;
    buf[0x10] = (now.year() % 100) as u8;
    buf[0x11] = now.weekday().number_from_monday() as u8;
    buf[0x12] = now.day() as u8;
    buf[0x13] = now.month() as u8;
    buf[0x18..0x1c].copy_from_slice(&local.ip().octets());
    LittleEndian::write_u16(&mut buf[0x1c..0x1e], local.port());
    buf[0x26] = 0x06;

    let sum = checksum(&buf);
    LittleEndian::write_u16(&mut buf[0x20..0x22], sum);
    buf
}

/// Identity a device announces in its discovery reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryReply {
    pub mac: Mac,
    pub type_code: u16,
}

impl DiscoveryReply {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < REPLY_MIN_SIZE {
            return Err(ProtocolError::Truncated {
                len: buf.len(),
                min: REPLY_MIN_SIZE,
            }
            .into());
        }

        let type_code = LittleEndian::read_u16(&buf[0x34..0x36]);
        let mut reversed = [0u8; 6];
        reversed.copy_from_slice(&buf[0x3a..0x40]);

        Ok(Self {
            mac: Mac::from_reversed(reversed),
            type_code,
        })
    }
}
