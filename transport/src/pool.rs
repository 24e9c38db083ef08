//! Bounded pool of streaming transports.
//!
//! `get` hands out an idle connection or builds a new one up to `max_size`;
//! past that it waits up to `acquire_timeout` and then fails with a typed
//! error. `put` validates the connection and stops any active streaming
//! before returning it to the idle list.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::StreamingTransport;
use crate::TransportError;

pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_size: usize,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool exhausted after waiting {0:?}")]
    Exhausted(Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

type ConnectFuture<T> = Pin<Box<dyn Future<Output = Result<Arc<T>, TransportError>> + Send>>;
type Factory<T> = Box<dyn Fn() -> ConnectFuture<T> + Send + Sync>;

pub struct ConnectionPool<T: StreamingTransport> {
    config: PoolConfig,
    factory: Factory<T>,
    idle: Mutex<Vec<Arc<T>>>,
    permits: Arc<Semaphore>,
}

impl<T: StreamingTransport> ConnectionPool<T> {
    /// The factory must return a connected transport.
    pub fn new(config: PoolConfig, factory: Factory<T>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_size.max(1))),
            config,
            factory,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Take a connection, waiting up to the configured acquire timeout when
    /// the pool is at capacity.
    pub async fn get(&self) -> Result<Arc<T>, PoolError> {
        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            self.permits.acquire(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                return Err(PoolError::Exhausted(self.config.acquire_timeout));
            }
        };
        // The permit is restored by `put`, not by dropping the guard.
        permit.forget();

        loop {
            let candidate = self.idle.lock().await.pop();
            match candidate {
                Some(connection) if connection.is_connected() => return Ok(connection),
                Some(_) => {
                    debug!("discarding dead pooled connection");
                }
                None => break,
            }
        }

        match (self.factory)().await {
            Ok(connection) => Ok(connection),
            Err(err) => {
                self.permits.add_permits(1);
                Err(err.into())
            }
        }
    }

    /// Return a connection. Dead connections are dropped; live ones have any
    /// active streaming stopped first.
    pub async fn put(&self, connection: Arc<T>) {
        if connection.is_connected() {
            if connection.is_streaming() {
                if let Err(err) = connection.stop_streaming().await {
                    debug!("failed to stop streaming on returned connection: {err}");
                }
            }
            if connection.is_connected() {
                self.idle.lock().await.push(connection);
            }
        }
        self.permits.add_permits(1);
    }

    /// Disconnect and drop every idle connection. Connections currently
    /// checked out are untouched; they are validated on `put` as usual.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<T>> = self.idle.lock().await.drain(..).collect();
        for connection in drained {
            connection.disconnect().await;
        }
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use remsh_core::CommandRegistry;
    use remsh_core::EmptyContext;

    use crate::MemoryTransport;
    use crate::Transport;

    fn pool(max_size: usize, acquire_timeout: Duration) -> ConnectionPool<MemoryTransport> {
        let config = PoolConfig {
            max_size,
            acquire_timeout,
        };
        ConnectionPool::new(
            config,
            Box::new(|| {
                Box::pin(async {
                    let transport = Arc::new(MemoryTransport::new(
                        Arc::new(CommandRegistry::new()),
                        Arc::new(EmptyContext::new()),
                    ));
                    transport.connect().await?;
                    Ok(transport)
                })
            }),
        )
    }

    #[tokio::test]
    async fn get_creates_up_to_max_then_reuses() {
        let pool = pool(2, Duration::from_millis(50));
        let first = pool.get().await.expect("first");
        let second = pool.get().await.expect("second");
        pool.put(first).await;
        assert_eq!(pool.idle_count().await, 1);
        let third = pool.get().await.expect("reused");
        assert_eq!(pool.idle_count().await, 0);
        pool.put(second).await;
        pool.put(third).await;
    }

    #[tokio::test]
    async fn exhausted_pool_times_out_with_typed_error() {
        let pool = pool(1, Duration::from_millis(30));
        let held = pool.get().await.expect("first");
        let err = pool.get().await.expect_err("should exhaust");
        assert!(matches!(err, PoolError::Exhausted(_)));
        pool.put(held).await;
        let again = pool.get().await.expect("released");
        pool.put(again).await;
    }

    #[tokio::test]
    async fn put_stops_streaming_and_drops_dead_connections() {
        let pool = pool(1, Duration::from_millis(30));
        let connection = pool.get().await.expect("get");
        connection.start_streaming().await.expect("subscribe");
        pool.put(connection).await;
        let connection = pool.get().await.expect("get again");
        assert!(!connection.is_streaming());

        connection.disconnect().await;
        pool.put(connection).await;
        assert_eq!(pool.idle_count().await, 0);
    }

    #[tokio::test]
    async fn close_all_disconnects_idle_connections() {
        let pool = pool(2, Duration::from_millis(30));
        let first = pool.get().await.expect("first");
        let second = pool.get().await.expect("second");
        let probe = Arc::clone(&first);
        pool.put(first).await;
        pool.put(second).await;
        assert_eq!(pool.idle_count().await, 2);

        pool.close_all().await;
        assert_eq!(pool.idle_count().await, 0);
        assert!(!probe.is_connected());
    }
}
