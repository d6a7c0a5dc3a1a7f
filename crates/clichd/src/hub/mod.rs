//! Broadcast hub.
//!
//! Owns the [`ClientRegistry`] and turns one inbound frame into concurrent
//! outbound writes to every registered connection.
//!
//! # Fan-out
//!
//! ```text
//!  publish(sender, frame)
//!        │
//!        │ snapshot() (registry lock held for the copy only)
//!        ▼
//!  ┌───────────┐  acquire permit   ┌────────────────────────┐
//!  │  entries  │──────────────────▶│ write task (per peer)  │──▶ deliver(frame, timeout)
//!  └───────────┘   (semaphore)     └────────────────────────┘          │
//!                                                                       │ error / timeout
//!                                                                       ▼
//!                                                  mark_closed() + registry.remove(peer)
//! ```
//!
//! Failures stay with the peer that caused them: the other peers still
//! receive the frame and `publish` never returns an error.

mod delivery;

pub use delivery::{DeliveryError, PeerConnection};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, trace};

use clich_core::{ClientIdentity, ConnectionId};

use crate::auth::CredentialVerifier;
use crate::config::HubConfig;
use crate::registry::{ClientRegistry, RegistryEntry, RegistryError};

/// Outcome of one fan-out. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Connections the frame was addressed to
    pub targets: usize,

    /// Writes that completed
    pub delivered: usize,

    /// Writes that failed or timed out (those peers were removed)
    pub failed: usize,
}

/// The broadcast hub.
///
/// Shared between sessions behind an `Arc`.
pub struct BroadcastHub {
    registry: Arc<ClientRegistry>,
    write_permits: Arc<Semaphore>,
    config: HubConfig,
    verifier: Option<Arc<dyn CredentialVerifier>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Arc::new(ClientRegistry::new(config.max_connections)),
            write_permits: Arc::new(Semaphore::new(config.max_concurrent_writes)),
            config,
            verifier: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Requires admissions to present a credential accepted by `verifier`.
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn verifier(&self) -> Option<&Arc<dyn CredentialVerifier>> {
        self.verifier.as_ref()
    }

    /// Allocates the handle for a newly accepted transport.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a connection that completed its handshake.
    pub fn register(
        &self,
        connection: Arc<PeerConnection>,
        identity: ClientIdentity,
    ) -> Result<(), RegistryError> {
        let conn_id = connection.id();
        self.registry.register(connection, identity)?;
        debug!(conn_id = %conn_id, count = self.registry.len(), "Registered connection");
        Ok(())
    }

    /// Removes a connection; a no-op if it is already gone.
    pub fn deregister(&self, conn_id: ConnectionId) -> Option<RegistryEntry> {
        let removed = self.registry.remove(conn_id);
        if removed.is_some() {
            debug!(conn_id = %conn_id, "Deregistered connection");
        }
        removed
    }

    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.registry.snapshot()
    }

    pub fn contains(&self, conn_id: ConnectionId) -> bool {
        self.registry.contains(conn_id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Relays `frame` to every registered connection.
    ///
    /// The sender is included when `echo` is enabled. Each write is bounded
    /// by the configured write timeout, and at most `max_concurrent_writes`
    /// writes are in flight across the whole hub. Returns once every write
    /// for this frame has finished or timed out.
    ///
    /// Write tasks are detached: if the caller stops awaiting, in-flight
    /// writes still complete and still remove peers that fail.
    pub async fn publish(&self, sender: ConnectionId, frame: Arc<[u8]>) -> PublishReport {
        let targets: Vec<RegistryEntry> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|entry| self.config.echo || entry.id() != sender)
            .collect();

        let mut report = PublishReport {
            targets: targets.len(),
            ..PublishReport::default()
        };

        let write_timeout = self.config.write_timeout();
        let mut writes = Vec::with_capacity(targets.len());

        for entry in targets {
            let permit = match Arc::clone(&self.write_permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "Write permits closed, abandoning fan-out");
                    report.failed += 1;
                    continue;
                }
            };

            let registry = Arc::clone(&self.registry);
            let frame = Arc::clone(&frame);

            writes.push(tokio::spawn(async move {
                let result = entry.connection.deliver(&frame, write_timeout).await;
                drop(permit);

                match result {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(
                            conn_id = %entry.id(),
                            client_id = %entry.identity.id,
                            error = %e,
                            "Failed to deliver frame, dropping connection"
                        );
                        // Wakes the peer's session so it stops reading too
                        entry.connection.mark_closed();
                        registry.remove(entry.id());
                        false
                    }
                }
            }));
        }

        for write in writes {
            match write.await {
                Ok(true) => report.delivered += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    error!(error = %e, "Write task failed");
                    report.failed += 1;
                }
            }
        }

        trace!(
            sender = %sender,
            targets = report.targets,
            delivered = report.delivered,
            failed = report.failed,
            "Fan-out complete"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use clich_protocol::read_frame;
    use tokio::io::{BufReader, DuplexStream};
    use tokio::time::{sleep, timeout, Instant};

    fn test_config() -> HubConfig {
        HubConfig {
            write_timeout_ms: 100,
            ..HubConfig::default()
        }
    }

    /// Registers a peer backed by an in-memory pipe and returns the client end.
    fn attach(hub: &BroadcastHub, id: &str, buffer: usize) -> (ConnectionId, BufReader<DuplexStream>) {
        let (client, server) = tokio::io::duplex(buffer);
        let conn_id = hub.next_connection_id();
        let peer = Arc::new(PeerConnection::new(conn_id, server));
        hub.register(peer, ClientIdentity::new(id, id)).unwrap();
        (conn_id, BufReader::new(client))
    }

    async fn recv(reader: &mut BufReader<DuplexStream>) -> Option<Vec<u8>> {
        timeout(Duration::from_secs(1), read_frame(reader, 1024))
            .await
            .ok()
            .and_then(|r| r.ok())
            .flatten()
    }

    fn frame(bytes: &[u8]) -> Arc<[u8]> {
        Arc::from(bytes)
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let hub = BroadcastHub::new(test_config());
        let a = hub.next_connection_id();
        let b = hub.next_connection_id();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_publish_with_echo_reaches_everyone() {
        let hub = BroadcastHub::new(test_config());
        let (a, mut a_rx) = attach(&hub, "a", 1024);
        let (_b, mut b_rx) = attach(&hub, "b", 1024);

        let report = hub.publish(a, frame(b"hello")).await;
        assert_eq!(
            report,
            PublishReport {
                targets: 2,
                delivered: 2,
                failed: 0
            }
        );

        assert_eq!(recv(&mut a_rx).await, Some(b"hello".to_vec()));
        assert_eq!(recv(&mut b_rx).await, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_publish_without_echo_skips_sender() {
        let hub = BroadcastHub::new(HubConfig {
            echo: false,
            ..test_config()
        });
        let (a, mut a_rx) = attach(&hub, "a", 1024);
        let (_b, mut b_rx) = attach(&hub, "b", 1024);

        let report = hub.publish(a, frame(b"hello")).await;
        assert_eq!(report.targets, 1);
        assert_eq!(recv(&mut b_rx).await, Some(b"hello".to_vec()));

        let nothing = timeout(Duration::from_millis(50), read_frame(&mut a_rx, 1024)).await;
        assert!(nothing.is_err(), "sender should not receive its own frame");
    }

    #[tokio::test]
    async fn test_failed_peer_is_isolated_and_removed() {
        let hub = BroadcastHub::new(test_config());
        let (a, mut a_rx) = attach(&hub, "a", 1024);
        let (b, b_rx) = attach(&hub, "b", 1024);
        let (c, mut c_rx) = attach(&hub, "c", 1024);

        // B's transport goes away without its session noticing
        drop(b_rx);

        let report = hub.publish(a, frame(b"hi")).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);

        assert_eq!(recv(&mut a_rx).await, Some(b"hi".to_vec()));
        assert_eq!(recv(&mut c_rx).await, Some(b"hi".to_vec()));

        assert!(hub.contains(a));
        assert!(!hub.contains(b));
        assert!(hub.contains(c));
    }

    #[tokio::test]
    async fn test_stalled_peer_times_out_and_is_removed() {
        let hub = BroadcastHub::new(test_config());
        let (a, mut a_rx) = attach(&hub, "a", 1024);
        // Nobody reads from this 4-byte pipe
        let (stalled, _stalled_rx) = attach(&hub, "stalled", 4);
        let stalled_peer = hub
            .snapshot()
            .into_iter()
            .find(|entry| entry.id() == stalled)
            .unwrap()
            .connection;

        let started = Instant::now();
        let report = hub.publish(a, frame(b"a frame longer than four bytes")).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.failed, 1);
        assert!(!hub.contains(stalled));
        assert!(stalled_peer.is_closed(), "dropped peer must be closed for its session");
        assert_eq!(
            recv(&mut a_rx).await,
            Some(b"a frame longer than four bytes".to_vec())
        );
    }

    #[tokio::test]
    async fn test_publish_to_empty_registry() {
        let hub = BroadcastHub::new(test_config());
        let report = hub.publish(ConnectionId::new(1), frame(b"void")).await;
        assert_eq!(report, PublishReport::default());
    }

    #[tokio::test]
    async fn test_sender_frames_arrive_in_order() {
        let hub = BroadcastHub::new(test_config());
        let (a, _a_rx) = attach(&hub, "a", 1024);
        let (_b, mut b_rx) = attach(&hub, "b", 1024);

        for i in 0..20 {
            hub.publish(a, frame(format!("msg-{i}").as_bytes())).await;
        }
        for i in 0..20 {
            assert_eq!(recv(&mut b_rx).await, Some(format!("msg-{i}").into_bytes()));
        }
    }

    #[tokio::test]
    async fn test_write_concurrency_is_bounded() {
        let hub = BroadcastHub::new(HubConfig {
            max_concurrent_writes: 1,
            write_timeout_ms: 100,
            ..HubConfig::default()
        });
        let (a, _a_rx) = attach(&hub, "a", 4);
        let (b, _b_rx) = attach(&hub, "b", 4);
        let (c, _c_rx) = attach(&hub, "c", 4);

        // Three stalled peers, one permit: the writes run one after another
        let started = Instant::now();
        let report = hub.publish(a, frame(b"does not fit in the pipe")).await;

        assert_eq!(report.failed, 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!hub.contains(a) && !hub.contains(b) && !hub.contains(c));
    }

    #[tokio::test]
    async fn test_register_not_blocked_by_stalled_fan_out() {
        let hub = Arc::new(BroadcastHub::new(HubConfig {
            write_timeout_ms: 2_000,
            ..HubConfig::default()
        }));
        let (a, _a_rx) = attach(&hub, "a", 4);

        let publisher = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.publish(a, Arc::from(&b"stuck frame"[..])).await })
        };
        sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        let (late, _late_rx) = attach(&hub, "late", 1024);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(hub.contains(late));
        assert!(!publisher.is_finished());

        publisher.abort();
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let hub = BroadcastHub::new(test_config());
        let (a, _a_rx) = attach(&hub, "a", 1024);

        assert!(hub.deregister(a).is_some());
        assert!(hub.deregister(a).is_none());
        assert_eq!(hub.connection_count(), 0);
    }
}
