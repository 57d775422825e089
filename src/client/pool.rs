// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::VecDeque;
use std::future::Future;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::service::ClientConfig;
use crate::{AppError, AppResult};

/// Creates, checks and disposes of the objects a [`Pool`] hands out.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn create(&self) -> impl Future<Output = AppResult<Self::Connection>> + Send;

    /// Whether `connection` can still be used, checked on borrow and on return.
    fn validate(&self, connection: &Self::Connection) -> bool;

    fn destroy(&self, connection: Self::Connection);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_total: usize,
    pub max_idle: usize,
    pub min_idle: usize,
    pub borrow_timeout: Duration,
}

impl From<&ClientConfig> for PoolConfig {
    fn from(config: &ClientConfig) -> Self {
        PoolConfig {
            max_total: config.pool_max_total,
            max_idle: config.pool_max_idle,
            min_idle: config.pool_min_idle,
            borrow_timeout: config.borrow_timeout(),
        }
    }
}

struct Idle<C> {
    connection: C,
    permit: OwnedSemaphorePermit,
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    // one permit per live object, idle or borrowed
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Idle<F::Connection>>>,
    idle_available: Notify,
    closed: AtomicBool,
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn take_idle(&self) -> Option<Idle<F::Connection>> {
        loop {
            let idle = self.idle.lock().pop_front()?;
            if self.factory.validate(&idle.connection) {
                return Some(idle);
            }
            trace!("dropping invalid idle connection");
            self.factory.destroy(idle.connection);
        }
    }

    fn give_back(&self, connection: F::Connection, permit: OwnedSemaphorePermit) {
        if self.closed.load(Ordering::Acquire) || !self.factory.validate(&connection) {
            self.factory.destroy(connection);
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() >= self.config.max_idle {
            drop(idle);
            self.factory.destroy(connection);
            return;
        }
        idle.push_back(Idle { connection, permit });
        drop(idle);
        self.idle_available.notify_one();
    }
}

/// A bounded object pool.
///
/// At most `max_total` objects exist at any time, borrowed or idle. Returned objects
/// beyond `max_idle` are destroyed.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ConnectionFactory> Pool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Pool {
            inner: Arc::new(PoolInner {
                factory,
                config,
                permits: Arc::new(Semaphore::new(config.max_total)),
                idle: Mutex::new(VecDeque::with_capacity(config.max_idle)),
                idle_available: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Creates idle objects until `min_idle` are available.
    pub async fn prefill(&self) -> AppResult<()> {
        while self.idle_count() < self.inner.config.min_idle {
            let Ok(permit) = self.inner.permits.clone().try_acquire_owned() else {
                break;
            };
            let connection = self.inner.factory.create().await?;
            self.inner.give_back(connection, permit);
        }
        debug!("pool prefilled with {} idle objects", self.idle_count());
        Ok(())
    }

    /// Borrows an idle object or creates one, waiting up to `borrow_timeout` for room.
    pub async fn borrow(&self) -> AppResult<PooledConnection<F>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(AppError::IllegalStateError("pool is closed".to_string()));
        }
        let borrow_timeout = self.inner.config.borrow_timeout;
        match tokio::time::timeout(borrow_timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::PoolExhausted(format!(
                "no object available within {:?}, {} in use",
                borrow_timeout,
                self.active_count()
            ))),
        }
    }

    async fn acquire(&self) -> AppResult<PooledConnection<F>> {
        loop {
            if let Some(idle) = self.inner.take_idle() {
                return Ok(self.wrap(idle.connection, idle.permit));
            }
            tokio::select! {
                permit = self.inner.permits.clone().acquire_owned() => {
                    let permit = permit.map_err(|_| {
                        AppError::IllegalStateError("pool is closed".to_string())
                    })?;
                    let connection = self.inner.factory.create().await?;
                    if !self.inner.factory.validate(&connection) {
                        self.inner.factory.destroy(connection);
                        return Err(AppError::TransportUnavailable(
                            "new connection failed validation".to_string(),
                        ));
                    }
                    return Ok(self.wrap(connection, permit));
                }
                _ = self.inner.idle_available.notified() => {}
            }
        }
    }

    fn wrap(&self, connection: F::Connection, permit: OwnedSemaphorePermit) -> PooledConnection<F> {
        PooledConnection {
            connection: ManuallyDrop::new(connection),
            permit: Some(permit),
            pool: self.inner.clone(),
            broken: false,
        }
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Objects currently borrowed.
    pub fn active_count(&self) -> usize {
        let live = self.inner.config.max_total - self.inner.permits.available_permits();
        live.saturating_sub(self.idle_count())
    }

    /// Destroys idle objects and refuses further borrows. Borrowed objects are destroyed
    /// when they come back.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        let drained: Vec<_> = self.inner.idle.lock().drain(..).collect();
        for idle in drained {
            self.inner.factory.destroy(idle.connection);
        }
        debug!("pool closed");
    }
}

/// A borrowed object, returned to its pool on drop.
pub struct PooledConnection<F: ConnectionFactory> {
    // taken exactly once, in drop
    connection: ManuallyDrop<F::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<F>>,
    broken: bool,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Destroys the object instead of returning it.
    pub fn invalidate(mut self) {
        self.broken = true;
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        // SAFETY: `connection` is never used again after this point
        let connection = unsafe { ManuallyDrop::take(&mut self.connection) };
        let Some(permit) = self.permit.take() else {
            self.pool.factory.destroy(connection);
            return;
        };
        if self.broken {
            self.pool.factory.destroy(connection);
            drop(permit);
            return;
        }
        self.pool.give_back(connection, permit);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        healthy: AtomicBool,
    }

    struct Conn {
        id: usize,
    }

    impl ConnectionFactory for Arc<CountingFactory> {
        type Connection = Conn;

        async fn create(&self) -> AppResult<Conn> {
            let id = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Conn { id })
        }

        fn validate(&self, _connection: &Conn) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        fn destroy(&self, _connection: Conn) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(
        max_total: usize,
        max_idle: usize,
        min_idle: usize,
    ) -> (Arc<CountingFactory>, Pool<Arc<CountingFactory>>) {
        let factory = Arc::new(CountingFactory::default());
        factory.healthy.store(true, Ordering::SeqCst);
        let pool = Pool::new(
            factory.clone(),
            PoolConfig {
                max_total,
                max_idle,
                min_idle,
                borrow_timeout: Duration::from_millis(100),
            },
        );
        (factory, pool)
    }

    #[tokio::test]
    async fn reuses_returned_objects() {
        let (factory, pool) = pool(2, 2, 0);
        let first_id = {
            let conn = pool.borrow().await.unwrap();
            assert_eq!(pool.active_count(), 1);
            conn.id
        };
        assert_eq!(pool.idle_count(), 1);
        let conn = pool.borrow().await.unwrap();
        assert_eq!(conn.id, first_id);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn borrow_times_out_when_exhausted() {
        let (_factory, pool) = pool(1, 1, 0);
        let held = pool.borrow().await.unwrap();
        assert!(matches!(pool.borrow().await, Err(AppError::PoolExhausted(_))));
        drop(held);
        assert!(pool.borrow().await.is_ok());
    }

    #[tokio::test]
    async fn waiting_borrower_gets_returned_object() {
        let (factory, pool) = pool(1, 1, 0);
        let held = pool.borrow().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow().await.map(|conn| conn.id) })
        };
        tokio::task::yield_now().await;
        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), 0);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidated_and_unhealthy_objects_are_destroyed() {
        let (factory, pool) = pool(2, 2, 0);
        pool.borrow().await.unwrap().invalidate();
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);

        drop(pool.borrow().await.unwrap());
        assert_eq!(pool.idle_count(), 1);
        factory.healthy.store(false, Ordering::SeqCst);
        // the idle one fails validation, so does the fresh one
        assert!(pool.borrow().await.is_err());
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn idle_cap_and_prefill() {
        let (factory, pool) = pool(4, 1, 1);
        pool.prefill().await.unwrap();
        assert_eq!(pool.idle_count(), 1);

        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);

        pool.close();
        assert_eq!(pool.idle_count(), 0);
        assert!(pool.borrow().await.is_err());
    }
}
