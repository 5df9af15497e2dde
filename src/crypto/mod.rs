//! Session encryption for RM devices.
//!
//! The vendor protocol is AES-128 in CBC mode with zero padding and a fixed
//! IV shared by the whole device family. The IV and the bootstrap key are
//! protocol constants, not secrets: every device ships with them, and the
//! bootstrap key only protects the authentication exchange that replaces it.
//!
//! Zero padding means a round trip does not restore the original length;
//! callers know the true payload size from the fixed-size payloads they
//! build.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use parking_lot::RwLock;

use crate::error::CryptoError;

/// AES-128 key size.
pub const KEY_SIZE: usize = 16;

/// AES block size.
pub const BLOCK_SIZE: usize = 16;

/// Well-known key every device accepts for the authentication exchange.
pub const BOOTSTRAP_KEY: [u8; KEY_SIZE] = [
    0x09, 0x76, 0x28, 0x34, 0x3f, 0xe9, 0x9e, 0x23, 0x76, 0x5c, 0x15, 0x13, 0xac, 0xcf, 0x8b,
    0x02,
];

/// Fixed IV shared by all devices of this protocol family.
pub const PROTOCOL_IV: [u8; BLOCK_SIZE] = [
    0x56, 0x2e, 0x17, 0x99, 0x6d, 0x09, 0x3d, 0x28, 0xdd, 0xb3, 0xba, 0x69, 0x5a, 0x2e, 0x6f,
    0x58,
];

/// Zero-pad `data` up to a multiple of `BLOCK_SIZE`. Already-aligned input
/// (including empty input) is returned unchanged.
pub fn zero_pad(data: &[u8]) -> Vec<u8> {
    let mut padded = data.to_vec();
    let rem = padded.len() % BLOCK_SIZE;
    if rem != 0 {
        padded.resize(padded.len() + BLOCK_SIZE - rem, 0);
    }
    padded
}

/// Holds the session key and performs AES-128-CBC in both directions.
///
/// The key starts as [`BOOTSTRAP_KEY`] and is swapped exactly once when the
/// authentication reply arrives. The receive loop is the only writer; the
/// send path reads whatever key is current.
pub struct CryptoSession {
    key: RwLock<[u8; KEY_SIZE]>,
}

impl Default for CryptoSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoSession {
    /// Start with the bootstrap key, as every fresh session does.
    pub fn new() -> Self {
        Self::with_key(BOOTSTRAP_KEY)
    }

    pub fn with_key(key: [u8; KEY_SIZE]) -> Self {
        Self {
            key: RwLock::new(key),
        }
    }

    /// Install the device-issued session key. All subsequent encrypt and
    /// decrypt calls use it until the session ends.
    pub fn set_key(&self, key: [u8; KEY_SIZE]) {
        *self.key.write() = key;
    }

    pub fn current_key(&self) -> [u8; KEY_SIZE] {
        *self.key.read()
    }

    /// Encrypt a plaintext payload. The result length is the plaintext
    /// length rounded up to the block size; empty input yields empty output.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes128::new(GenericArray::from_slice(&self.current_key()));
        let mut buf = zero_pad(plaintext);

        let mut prev = PROTOCOL_IV;
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            for (b, p) in block.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
            prev.copy_from_slice(block);
        }
        buf
    }

    /// Decrypt a ciphertext payload. Rejects input that is not a whole
    /// number of blocks, which is how stray datagrams from unrelated
    /// senders usually announce themselves.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidCiphertextLength(ciphertext.len()));
        }

        let cipher = Aes128::new(GenericArray::from_slice(&self.current_key()));
        let mut buf = ciphertext.to_vec();

        let mut prev = PROTOCOL_IV;
        let mut carried = [0u8; BLOCK_SIZE];
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            carried.copy_from_slice(block);
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
            for (b, p) in block.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            prev = carried;
        }
        Ok(buf)
    }
}

impl std::fmt::Debug for CryptoSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes intentionally omitted.
        f.debug_struct("CryptoSession").finish_non_exhaustive()
    }
}
