//! Lazy, self-healing connection ownership.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::retry::RetryConfig;
use crate::store::StoreError;

/// Opens and health-checks connections to a store backend.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The live link produced by a successful open.
    type Connection: Send + Sync + 'static;

    /// Human readable description of the target, for logs.
    fn target(&self) -> String;

    /// Open a new connection.
    async fn open(&self) -> Result<Self::Connection, StoreError>;

    /// Verify the backend behind `conn` is actually serving.
    async fn probe(&self, conn: &Self::Connection) -> Result<(), StoreError>;

    /// Whether a previously opened connection has been lost.
    fn is_closed(&self, _conn: &Self::Connection) -> bool {
        false
    }
}

/// Where the manager is in its connect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable connection
    Disconnected,
    /// A connect loop is running
    Connecting,
    /// A probed connection is available
    Connected,
}

/// Owns the single connection handle of a store.
///
/// The handle is opened on first use. Failed attempts are retried in
/// bursts separated by randomized backoff, and the loop never gives up on
/// its own: it only ends with a connection or when the shutdown token is
/// cancelled.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    retry: RetryConfig,
    /// Current connection, replaced wholesale on reconnect
    handle: RwLock<Option<Arc<C::Connection>>>,
    /// Serializes connect loops so concurrent callers share one
    connecting: tokio::sync::Mutex<()>,
    state: Mutex<ConnectionState>,
    /// Total open attempts since creation
    attempts: AtomicU64,
    shutdown: CancellationToken,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager with its own shutdown token.
    pub fn new(connector: C, retry: RetryConfig) -> Self {
        Self::with_shutdown(connector, retry, CancellationToken::new())
    }

    /// Create a manager that stops retrying once `shutdown` is cancelled.
    pub fn with_shutdown(connector: C, retry: RetryConfig, shutdown: CancellationToken) -> Self {
        Self {
            connector,
            retry: retry.normalized(),
            handle: RwLock::new(None),
            connecting: tokio::sync::Mutex::new(()),
            state: Mutex::new(ConnectionState::Disconnected),
            attempts: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Return the live connection, connecting first if there is none.
    ///
    /// Blocks for as long as the backend stays unreachable. Fails only with
    /// [`StoreError::MissingTarget`] or, after cancellation, with
    /// [`StoreError::Shutdown`].
    pub async fn ensure_connected(&self) -> Result<Arc<C::Connection>, StoreError> {
        if let Some(conn) = self.current() {
            return Ok(conn);
        }
        if self.shutdown.is_cancelled() {
            return Err(StoreError::Shutdown);
        }

        let _guard = tokio::select! {
            guard = self.connecting.lock() => guard,
            _ = self.shutdown.cancelled() => return Err(StoreError::Shutdown),
        };

        // Another caller may have connected while we waited for the lock.
        if let Some(conn) = self.current() {
            return Ok(conn);
        }

        self.connect().await
    }

    /// Drop `failed` so the next caller reconnects.
    ///
    /// Does nothing if the handle has already been replaced, so a caller
    /// holding a stale connection cannot discard a newer healthy one.
    pub fn invalidate(&self, failed: &Arc<C::Connection>) {
        {
            let mut handle = self.handle.write();
            if !matches!(handle.as_ref(), Some(current) if Arc::ptr_eq(current, failed)) {
                debug!(
                    target_addr = %self.connector.target(),
                    "Ignoring invalidation of a replaced connection"
                );
                return;
            }
            *handle = None;
        }
        warn!(target_addr = %self.connector.target(), "Dropping store connection");
        self.set_state(ConnectionState::Disconnected);
    }

    /// Stop any running or future connect loop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Token that cancels the connect loop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Number of open attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Effective retry settings after normalization.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// The connector this manager drives.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn current(&self) -> Option<Arc<C::Connection>> {
        let handle = self.handle.read();
        match handle.as_ref() {
            Some(conn) if !self.connector.is_closed(conn) => Some(Arc::clone(conn)),
            _ => None,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    async fn connect(&self) -> Result<Arc<C::Connection>, StoreError> {
        self.set_state(ConnectionState::Connecting);
        info!(target_addr = %self.connector.target(), "Connecting to counter store");

        loop {
            let mut last_error = None;

            for attempt in 1..=self.retry.burst {
                self.attempts.fetch_add(1, Ordering::Relaxed);

                let result = tokio::select! {
                    result = self.open_and_probe() => result,
                    _ = self.shutdown.cancelled() => Err(StoreError::Shutdown),
                };

                match result {
                    Ok(conn) => {
                        let conn = Arc::new(conn);
                        *self.handle.write() = Some(Arc::clone(&conn));
                        self.set_state(ConnectionState::Connected);
                        info!(
                            target_addr = %self.connector.target(),
                            attempts = self.attempts(),
                            "Connected to counter store"
                        );
                        return Ok(conn);
                    }
                    Err(e @ (StoreError::MissingTarget | StoreError::Shutdown)) => {
                        self.set_state(ConnectionState::Disconnected);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(
                            attempt = attempt,
                            burst = self.retry.burst,
                            error = %e,
                            "Store connection attempt failed"
                        );
                        last_error = Some(e);
                    }
                }

                self.pause(self.retry.attempt_interval()).await?;
            }

            let backoff = self.retry.backoff();
            error!(
                target_addr = %self.connector.target(),
                error = ?last_error.map(|e| e.to_string()),
                backoff_ms = backoff.as_millis() as u64,
                "Trouble connecting to counter store, re-entering retry loop after backoff"
            );
            self.pause(backoff).await?;
        }
    }

    async fn open_and_probe(&self) -> Result<C::Connection, StoreError> {
        let conn = self.connector.open().await?;
        self.connector.probe(&conn).await?;
        debug!(target_addr = %self.connector.target(), "Store health probe succeeded");
        Ok(conn)
    }

    async fn pause(&self, duration: Duration) -> Result<(), StoreError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.shutdown.cancelled() => {
                info!("Connection loop cancelled by shutdown");
                self.set_state(ConnectionState::Disconnected);
                Err(StoreError::Shutdown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32};

    /// Connector that fails a scripted number of opens and probes.
    #[derive(Default)]
    struct ScriptedConnector {
        open_failures: AtomicU32,
        probe_failures: AtomicU32,
        opens: AtomicU32,
        missing_target: bool,
        closed: AtomicBool,
    }

    impl ScriptedConnector {
        fn failing_opens(n: u32) -> Self {
            Self {
                open_failures: AtomicU32::new(n),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Connection = u32;

        fn target(&self) -> String {
            "scripted".to_string()
        }

        async fn open(&self) -> Result<u32, StoreError> {
            if self.missing_target {
                return Err(StoreError::MissingTarget);
            }
            let generation = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
            let remaining = self.open_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.open_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Connect("connection refused".to_string()));
            }
            self.closed.store(false, Ordering::SeqCst);
            Ok(generation)
        }

        async fn probe(&self, _conn: &u32) -> Result<(), StoreError> {
            let remaining = self.probe_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.probe_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Probe("database is starting up".to_string()));
            }
            Ok(())
        }

        fn is_closed(&self, _conn: &u32) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn fast_retry(burst: u32) -> RetryConfig {
        RetryConfig {
            burst,
            attempt_interval_ms: 1000,
            backoff_unit_ms: 1000,
            backoff_max_factor: 10,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_lazily_and_reuses_handle() {
        let manager = ConnectionManager::new(ScriptedConnector::default(), fast_retry(1));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.attempts(), 0);

        let first = manager.ensure_connected().await.unwrap();
        let second = manager.ensure_connected().await.unwrap();

        assert_eq!(*first, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_failed_bursts() {
        let manager = ConnectionManager::new(ScriptedConnector::failing_opens(2), fast_retry(1));
        let started = tokio::time::Instant::now();

        let conn = manager.ensure_connected().await.unwrap();

        assert_eq!(*conn, 3);
        assert_eq!(manager.attempts(), 3);
        // One attempt interval after each failed attempt at minimum.
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_counts_as_failed_attempt() {
        let connector = ScriptedConnector {
            probe_failures: AtomicU32::new(1),
            ..Default::default()
        };
        let manager = ConnectionManager::new(connector, fast_retry(3));

        let conn = manager.ensure_connected().await.unwrap();
        assert_eq!(*conn, 2);
        assert_eq!(manager.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_burst_is_corrected() {
        let manager = ConnectionManager::new(ScriptedConnector::default(), fast_retry(0));
        assert_eq!(manager.retry().burst, super::super::retry::DEFAULT_BURST);
        assert!(manager.ensure_connected().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_target_is_not_retried() {
        let connector = ScriptedConnector {
            missing_target: true,
            ..Default::default()
        };
        let manager = ConnectionManager::new(connector, fast_retry(3));

        let result = manager.ensure_connected().await;
        assert!(matches!(result, Err(StoreError::MissingTarget)));
        assert_eq!(manager.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_retry_loop() {
        let manager = Arc::new(ConnectionManager::new(
            ScriptedConnector::failing_opens(u32::MAX),
            fast_retry(2),
        ));

        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.ensure_connected().await })
        };

        tokio::time::sleep(Duration::from_secs(30)).await;
        manager.shutdown();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(StoreError::Shutdown)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.attempts() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_connect() {
        let manager = Arc::new(ConnectionManager::new(
            ScriptedConnector::failing_opens(1),
            fast_retry(2),
        ));

        let callers = (0..8).map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.ensure_connected().await })
        });
        let results = futures::future::join_all(callers).await;

        for result in results {
            assert_eq!(*result.unwrap().unwrap(), 2);
        }
        assert_eq!(manager.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_reconnect() {
        let manager = ConnectionManager::new(ScriptedConnector::default(), fast_retry(1));

        let conn = manager.ensure_connected().await.unwrap();
        assert_eq!(*conn, 1);
        manager.invalidate(&conn);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(*manager.ensure_connected().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_connection_is_replaced() {
        let manager = ConnectionManager::new(ScriptedConnector::default(), fast_retry(1));

        assert_eq!(*manager.ensure_connected().await.unwrap(), 1);
        manager.connector().closed.store(true, Ordering::SeqCst);
        assert_eq!(*manager.ensure_connected().await.unwrap(), 2);
    }

    /// Connection whose closed flag belongs to the link itself.
    struct FlaggedConn {
        generation: u32,
        closed: AtomicBool,
    }

    #[derive(Default)]
    struct FlaggedConnector {
        opens: AtomicU32,
    }

    #[async_trait]
    impl Connector for FlaggedConnector {
        type Connection = FlaggedConn;

        fn target(&self) -> String {
            "flagged".to_string()
        }

        async fn open(&self) -> Result<FlaggedConn, StoreError> {
            Ok(FlaggedConn {
                generation: self.opens.fetch_add(1, Ordering::SeqCst) + 1,
                closed: AtomicBool::new(false),
            })
        }

        async fn probe(&self, _conn: &FlaggedConn) -> Result<(), StoreError> {
            Ok(())
        }

        fn is_closed(&self, conn: &FlaggedConn) -> bool {
            conn.closed.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_invalidate_keeps_replacement_connection() {
        let manager = ConnectionManager::new(FlaggedConnector::default(), fast_retry(1));

        let first = manager.ensure_connected().await.unwrap();
        assert_eq!(first.generation, 1);

        // The first session drops and another caller reconnects before the
        // holder of the old handle reports its query error.
        first.closed.store(true, Ordering::SeqCst);
        let second = manager.ensure_connected().await.unwrap();
        assert_eq!(second.generation, 2);

        manager.invalidate(&first);
        assert_eq!(manager.state(), ConnectionState::Connected);
        let current = manager.ensure_connected().await.unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert_eq!(manager.attempts(), 2);

        manager.invalidate(&second);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.ensure_connected().await.unwrap().generation, 3);
    }
}
