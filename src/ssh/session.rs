//! SSH Session Manager
//!
//! Owns the single long-lived SSH session that every proxied request dials
//! through, and repairs it when it breaks.
//!
//! # Locking
//!
//! ```text
//!   dial ──► read lock ──► open channel on current session ──► Ok
//!                              │
//!                              └─ session closed ──► write lock
//!                                                      │
//!                                      still the same broken session?
//!                                        ├─ yes: close it, connect a new one
//!                                        └─ no:  someone else repaired it
//!                                                      │
//!                                                   retry dial
//! ```
//!
//! Dials only ever share the read lock, so concurrent requests never block
//! each other. The write lock is taken only to replace a broken session, and
//! the identity re-check under it guarantees one reconnect per breakage no
//! matter how many callers noticed it.
//!
//! # Retry accounting
//!
//! A single dial makes at most [`MAX_DIAL_ATTEMPTS`] channel-open attempts.
//! A reconnect happens only *between* attempts, so one call triggers at most
//! `MAX_DIAL_ATTEMPTS - 1` reconnects. Destination errors end the call on the
//! first attempt, and so does a failed reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::error::SshError;
use crate::proxy::BoxedConnection;

/// Channel-open attempts per dial
pub const MAX_DIAL_ATTEMPTS: usize = 3;

/// A live session able to open byte channels to remote destinations
#[async_trait]
pub trait SshChannelOpener: Send + Sync + 'static {
    /// Open a channel to `host:port` as seen from the remote end.
    ///
    /// Must return [`SshError::Disconnected`] when the session itself is
    /// unusable and a destination-level error otherwise.
    async fn open_channel(&self, host: &str, port: u16) -> Result<BoxedConnection, SshError>;

    /// Tear the session down.
    async fn close(&self);
}

/// Produces fresh authenticated sessions
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    type Session: SshChannelOpener;

    async fn connect(&self) -> Result<Self::Session, SshError>;
}

/// Shared, self-repairing SSH session
pub struct SessionManager<C: SessionConnector> {
    connector: C,
    /// `None` between a failed reconnect and the next successful one
    current: RwLock<Option<Arc<C::Session>>>,
    reconnects: AtomicU64,
}

impl<C: SessionConnector> SessionManager<C> {
    /// Establish the initial session.
    pub async fn start(connector: C) -> Result<Self, SshError> {
        let session = connector.connect().await?;
        Ok(Self {
            connector,
            current: RwLock::new(Some(Arc::new(session))),
            reconnects: AtomicU64::new(0),
        })
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// How many times a broken session has been replaced
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Open a channel to `host:port` through the shared session.
    pub async fn open_channel(&self, host: &str, port: u16) -> Result<BoxedConnection, SshError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let (observed, result) = {
                let guard = self.current.read().await;
                let observed = guard.clone();
                let result = match &observed {
                    Some(session) => session.open_channel(host, port).await,
                    None => Err(SshError::Disconnected),
                };
                (observed, result)
            };

            let err = match result {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_session_closed() => e,
                Err(e) => {
                    debug!("Dial {}:{} failed: {}", host, port, e);
                    return Err(e);
                }
            };

            if attempt >= MAX_DIAL_ATTEMPTS {
                warn!(
                    "Dial {}:{} gave up after {} attempts: {}",
                    host, port, attempt, err
                );
                return Err(err);
            }

            warn!(
                "SSH session unusable while dialing {}:{} (attempt {}/{}), reconnecting",
                host, port, attempt, MAX_DIAL_ATTEMPTS
            );
            self.repair(observed).await?;
        }
    }

    /// Replace `stale` with a new session unless another caller already did.
    async fn repair(&self, stale: Option<Arc<C::Session>>) -> Result<(), SshError> {
        let mut current = self.current.write().await;

        let still_stale = match (current.as_ref(), stale.as_ref()) {
            (Some(now), Some(seen)) => Arc::ptr_eq(now, seen),
            (None, None) => true,
            _ => false,
        };
        if !still_stale {
            debug!("SSH session already replaced by another caller");
            return Ok(());
        }

        if let Some(old) = current.take() {
            old.close().await;
        }

        match self.connector.connect().await {
            Ok(session) => {
                *current = Some(Arc::new(session));
                let n = self.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
                info!("SSH session re-established (reconnect #{})", n);
                Ok(())
            }
            Err(e) => {
                warn!("SSH reconnect failed: {}", e);
                Err(e)
            }
        }
    }

    /// Disconnect the current session, if any.
    pub async fn close(&self) {
        if let Some(session) = self.current.write().await.take() {
            session.close().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Destination that the mock remote network refuses
    pub(crate) const REFUSED_HOST: &str = "refused.invalid";

    pub(crate) struct MockSession {
        pub id: usize,
        pub broken: AtomicBool,
        pub opens: AtomicUsize,
        pub closed: AtomicBool,
    }

    #[async_trait]
    impl SshChannelOpener for Arc<MockSession> {
        async fn open_channel(
            &self,
            host: &str,
            port: u16,
        ) -> Result<BoxedConnection, SshError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            // Yield so concurrent callers interleave.
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.broken.load(Ordering::SeqCst) {
                return Err(SshError::Disconnected);
            }
            if host == REFUSED_HOST {
                return Err(SshError::ChannelOpenFailed {
                    target: format!("{}:{}", host, port),
                    reason: "ConnectFailed".into(),
                });
            }
            let (near, mut far) = tokio::io::duplex(1024);
            // Echo server at the far end of the channel
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = far.read(&mut buf).await {
                    if n == 0 || far.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
            Ok(Box::pin(near))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Connector whose sessions can be broken from the test.
    #[derive(Default)]
    pub(crate) struct MockConnector {
        pub connects: AtomicUsize,
        /// Number of upcoming connects that fail
        pub fail_next: AtomicUsize,
        /// New sessions are born broken
        pub born_broken: AtomicBool,
        pub sessions: parking_lot::Mutex<Vec<Arc<MockSession>>>,
    }

    impl MockConnector {
        pub(crate) fn session(&self, index: usize) -> Arc<MockSession> {
            self.sessions.lock()[index].clone()
        }

        pub(crate) fn break_session(&self, index: usize) {
            self.session(index).broken.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SessionConnector for MockConnector {
        type Session = Arc<MockSession>;

        async fn connect(&self) -> Result<Arc<MockSession>, SshError> {
            let pending_failures = self.fail_next.load(Ordering::SeqCst);
            if pending_failures > 0 {
                self.fail_next.store(pending_failures - 1, Ordering::SeqCst);
                return Err(SshError::ConnectionFailed("mock host down".into()));
            }
            let id = self.connects.fetch_add(1, Ordering::SeqCst);
            let session = Arc::new(MockSession {
                id,
                broken: AtomicBool::new(self.born_broken.load(Ordering::SeqCst)),
                opens: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            });
            self.sessions.lock().push(session.clone());
            Ok(session)
        }
    }

    async fn manager() -> Arc<SessionManager<MockConnector>> {
        Arc::new(SessionManager::start(MockConnector::default()).await.unwrap())
    }

    #[tokio::test]
    async fn test_dial_on_healthy_session() {
        let manager = manager().await;
        let mut conn = manager.open_channel("example.com", 80).await.unwrap();

        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.reconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_broken_session_is_replaced_once() {
        let manager = manager().await;
        manager.connector().break_session(0);

        manager.open_channel("example.com", 443).await.unwrap();

        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 2);
        assert_eq!(manager.reconnect_count(), 1);
        assert!(manager.connector().session(0).closed.load(Ordering::SeqCst));
        assert_eq!(manager.connector().session(1).id, 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_reconnect() {
        let manager = manager().await;
        manager.connector().break_session(0);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                manager.open_channel("example.com", 8000 + i).await.map(|_| ())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 2);
        assert_eq!(manager.reconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_refused_destination_does_not_reconnect() {
        let manager = manager().await;

        let err = manager.open_channel(REFUSED_HOST, 443).await.err().unwrap();
        assert!(matches!(err, SshError::ChannelOpenFailed { .. }));

        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.connector().session(0).opens.load(Ordering::SeqCst), 1);
        assert_eq!(manager.reconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_reconnect_is_retried_by_next_dial() {
        let manager = manager().await;
        manager.connector().break_session(0);
        manager.connector().fail_next.store(1, Ordering::SeqCst);

        let err = manager.open_channel("example.com", 80).await.err().unwrap();
        assert!(matches!(err, SshError::ConnectionFailed(_)));

        // No usable session now; the next dial establishes one.
        manager.open_channel("example.com", 80).await.unwrap();
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 2);
        assert_eq!(manager.reconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_dial_attempts_are_bounded() {
        let manager = manager().await;
        manager.connector().born_broken.store(true, Ordering::SeqCst);
        manager.connector().break_session(0);

        let err = manager.open_channel("example.com", 80).await.err().unwrap();
        assert!(err.is_session_closed());

        // initial session + one reconnect between each pair of attempts
        assert_eq!(
            manager.connector().connects.load(Ordering::SeqCst),
            MAX_DIAL_ATTEMPTS
        );
    }

    #[tokio::test]
    async fn test_close_disconnects_current_session() {
        let manager = manager().await;
        manager.close().await;
        assert!(manager.connector().session(0).closed.load(Ordering::SeqCst));
    }
}
