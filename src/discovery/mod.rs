//! Subnet discovery of RM devices.
//!
//! For each usable local IPv4 address, broadcast one hello packet to the
//! subnet broadcast address and wait a bounded time for a single reply.
//! Found devices are deduplicated by MAC for the lifetime of the scanner
//! (not persisted), filtered by an optional caller predicate, and driven
//! through authentication before they are handed back.

use std::collections::HashSet;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::protocol::{build_hello, DiscoveryReply};
use crate::session::DeviceSession;
use crate::types::{DeviceKind, Mac};
use crate::util::{local_ipv4_addresses, LocalAddress};

pub struct DiscoveryScanner {
    config: ClientConfig,
    seen: HashSet<Mac>,
}

impl DiscoveryScanner {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            seen: HashSet::new(),
        }
    }

    /// Scan all candidate local addresses and return the first new device,
    /// already authenticated, or `None` if nothing answered.
    pub async fn discover(&mut self) -> Result<Option<DeviceSession>> {
        self.discover_where(|_| true).await
    }

    /// Like [`Self::discover`], but a predicate can reject a constructed
    /// session before it is authenticated (e.g. to match a specific kind).
    /// Rejected devices stay eligible for later scans.
    pub async fn discover_where<F>(&mut self, predicate: F) -> Result<Option<DeviceSession>>
    where
        F: Fn(&DeviceSession) -> bool,
    {
        for local in local_ipv4_addresses() {
            let (reply, device_addr) = match self.probe(&local).await {
                Ok(Some(found)) => found,
                Ok(None) => continue,
                Err(e) => {
                    // A dead interface or refused bind means this candidate
                    // yielded nothing, not that the scan failed.
                    debug!(local = %local.addr, error = %e, "scan candidate failed");
                    continue;
                }
            };

            if self.seen.contains(&reply.mac) {
                trace!(mac = %reply.mac, "already discovered; skipping");
                continue;
            }

            let kind = DeviceKind::from_code(reply.type_code);
            let session = match DeviceSession::connect(
                reply.mac,
                kind,
                device_addr,
                SocketAddr::new(local.addr.into(), 0),
                self.config.clone(),
            )
            .await
            {
                Ok(session) => session,
                Err(e) => {
                    debug!(mac = %reply.mac, error = %e, "failed to connect to discovered device");
                    continue;
                }
            };

            if !predicate(&session) {
                trace!(mac = %reply.mac, kind = %kind, "rejected by predicate");
                continue;
            }

            let Some(session) = self.establish(session).await else {
                continue;
            };

            info!(mac = %reply.mac, kind = %kind, addr = %device_addr, "discovered device");
            return Ok(Some(session));
        }

        Ok(None)
    }

    /// One probe per candidate address; collect every distinct device that
    /// answers, authenticated, up to `limit`.
    pub async fn discover_all(&mut self, limit: usize) -> Vec<DeviceSession> {
        let mut found = Vec::new();
        while found.len() < limit {
            match self.discover().await {
                Ok(Some(session)) => found.push(session),
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "discovery pass failed");
                    break;
                }
            }
        }
        found
    }

    /// Broadcast one hello from `local` and wait for a single reply.
    async fn probe(&self, local: &LocalAddress) -> Result<Option<(DiscoveryReply, SocketAddr)>> {
        let socket = UdpSocket::bind(SocketAddr::new(local.addr.into(), 0)).await?;
        socket.set_broadcast(true)?;

        let bound = match socket.local_addr()? {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => return Ok(None),
        };

        let hello = build_hello(bound);
        let target = SocketAddr::new(local.broadcast.into(), self.config.device_port);
        trace!(local = %bound, %target, "broadcasting hello");
        socket.send_to(&hello, target).await?;

        let mut buf = vec![0u8; 1024];
        match timeout(self.config.discovery_timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                let reply = DiscoveryReply::decode(&buf[..len])?;
                // Commands go to the fixed device port regardless of the
                // port the reply happened to come from.
                let device_addr = SocketAddr::new(from.ip(), self.config.device_port);
                Ok(Some((reply, device_addr)))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    /// Drive a constructed session through the handshake. Any failure,
    /// including the initial auth send, counts as "this candidate yielded
    /// nothing": the session is closed and the MAC stays rediscoverable.
    async fn establish(&mut self, session: DeviceSession) -> Option<DeviceSession> {
        let mac = session.mac();
        self.remember(mac);

        let handshake = match session.authenticate().await {
            Ok(()) => session.wait_ready().await,
            Err(e) => Err(e),
        };
        match handshake {
            Ok(()) => Some(session),
            Err(e) => {
                debug!(mac = %mac, error = %e, "handshake failed");
                self.seen.remove(&mac);
                session.close().await;
                None
            }
        }
    }

    /// Record a MAC as discovered for this process's lifetime. Returns
    /// false when it was already known.
    fn remember(&mut self, mac: Mac) -> bool {
        self.seen.insert(mac)
    }
}

impl std::fmt::Debug for DiscoveryScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryScanner")
            .field("seen", &self.seen.len())
            .finish_non_exhaustive()
    }
}
