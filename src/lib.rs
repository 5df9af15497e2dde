//! # rmlink
//!
//! Async client for the UDP control protocol of Broadlink-style RM
//! infrared/RF relay appliances.
//!
//! The crate discovers a device on the local subnet, performs the vendor's
//! key-exchange authentication, and then exchanges AES-encrypted
//! command/response packets over a lossy, connectionless transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │          DiscoveryScanner (broadcast)         │
//! ├───────────────────────────────────────────────┤
//! │   DeviceSession (state machine + recv loop)   │
//! ├───────────────────────┬───────────────────────┤
//! │  protocol (framing,   │  crypto (AES-128-CBC, │
//! │  checksums, hello)    │  session rekeying)    │
//! ├───────────────────────┴───────────────────────┤
//! │        transport (connected UDP socket)       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use rmlink::prelude::*;
//!
//! # async fn demo() -> rmlink::Result<()> {
//! let mut scanner = DiscoveryScanner::new(ClientConfig::default());
//! if let Some(device) = scanner.discover().await? {
//!     let code = device.learn().await?;
//!     device.send_data(&code).await?;
//!     device.close().await;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)] // Checksum and clock-field math is intentionally truncating
#![allow(clippy::unreadable_literal)] // Wire offsets read better un-grouped
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;
pub mod util;

pub use config::ClientConfig;
pub use discovery::DiscoveryScanner;
pub use error::{Error, Result};
pub use session::DeviceSession;
pub use types::*;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// UDP port RM devices listen on.
pub const DEVICE_PORT: u16 = 80;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::ClientConfig;
    pub use crate::discovery::DiscoveryScanner;
    pub use crate::error::{Error, Result};
    pub use crate::session::DeviceSession;
    pub use crate::transport::{Transport, UdpTransport};
    pub use crate::types::*;
}
