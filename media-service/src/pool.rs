//! Bounded, fail-fast pools of reusable downstream clients.
//!
//! A pool owns up to `capacity` clients for one dependency. Clients are
//! created lazily by the pool's connect function and reused afterwards.
//! [`ClientPool::acquire`] never waits: when every client is checked out, or
//! a new connection cannot be made, it returns `None` and the caller fails
//! the request.
//!
//! A checked-out client is wrapped in a [`PooledClient`] guard which puts it
//! back when dropped. Because the guard is the only way to reach the client,
//! a client is never held by two callers at once, and it is returned exactly
//! once on every exit path, including errors and panics in the caller.

use crate::metrics_defs::{POOL_CONNECT_FAILED, POOL_EXHAUSTED};
use parking_lot::Mutex;
use shared::counter;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type ConnectFn<C> = Box<dyn Fn() -> Option<C> + Send + Sync>;

struct PoolState<C> {
    idle: Vec<C>,
    /// Clients created so far, idle or checked out
    total: usize,
}

pub struct ClientPool<C> {
    name: String,
    capacity: usize,
    state: Mutex<PoolState<C>>,
    outstanding: AtomicUsize,
    connect: ConnectFn<C>,
}

impl<C: Send> ClientPool<C> {
    /// Creates an empty pool for `name` that connects new clients on demand.
    pub fn new<F>(name: impl Into<String>, capacity: usize, connect: F) -> Arc<Self>
    where
        F: Fn() -> Option<C> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            capacity,
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(capacity),
                total: 0,
            }),
            outstanding: AtomicUsize::new(0),
            connect: Box::new(connect),
        })
    }

    /// Dependency name, used in error messages and metric tags.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of clients currently checked out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Number of connected clients waiting to be reused.
    pub fn idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Whether every client slot is checked out.
    pub fn is_saturated(&self) -> bool {
        self.outstanding() >= self.capacity
    }

    /// Checks out a client without waiting.
    ///
    /// Returns `None` when the pool is saturated or a new client could not
    /// be connected.
    pub fn acquire(self: &Arc<Self>) -> Option<PooledClient<C>> {
        let reused = {
            let mut state = self.state.lock();
            match state.idle.pop() {
                Some(client) => Some(client),
                None if state.total < self.capacity => {
                    // Reserve the slot before connecting so concurrent callers
                    // cannot overshoot the capacity.
                    state.total += 1;
                    None
                }
                None => {
                    drop(state);
                    tracing::warn!(pool = %self.name, capacity = self.capacity, "Client pool exhausted");
                    counter!(POOL_EXHAUSTED, "pool" => self.name.clone()).increment(1);
                    return None;
                }
            }
        };

        let client = match reused {
            Some(client) => client,
            None => match (self.connect)() {
                Some(client) => client,
                None => {
                    self.state.lock().total -= 1;
                    tracing::error!(pool = %self.name, "Failed to connect new pooled client");
                    counter!(POOL_CONNECT_FAILED, "pool" => self.name.clone()).increment(1);
                    return None;
                }
            },
        };

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Some(PooledClient {
            client: Some(client),
            pool: Arc::clone(self),
        })
    }

    /// Returns a client to the pool. Equivalent to dropping the guard.
    pub fn release(&self, client: PooledClient<C>) {
        drop(client);
    }

    fn put_back(&self, client: C) {
        self.state.lock().idle.push(client);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<C> fmt::Debug for ClientPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("outstanding", &self.outstanding.load(Ordering::Relaxed))
            .finish()
    }
}

/// Type-erased view of a pool for readiness checks.
pub trait PoolStatus: Send + Sync {
    fn name(&self) -> &str;
    fn is_saturated(&self) -> bool;
}

impl<C: Send> PoolStatus for ClientPool<C> {
    fn name(&self) -> &str {
        ClientPool::name(self)
    }

    fn is_saturated(&self) -> bool {
        ClientPool::is_saturated(self)
    }
}

/// A client checked out of a [`ClientPool`]. Returned to the pool on drop.
pub struct PooledClient<C: Send> {
    client: Option<C>,
    pool: Arc<ClientPool<C>>,
}

impl<C: Send> Deref for PooledClient<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only taken in Drop.
        self.client.as_ref().expect("pooled client already released")
    }
}

impl<C: Send> Drop for PooledClient<C> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.put_back(client);
        }
    }
}
