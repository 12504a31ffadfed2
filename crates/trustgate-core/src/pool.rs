//! Bounded, lazily grown connection pool for one source.
//!
//! Borrowers that find the pool saturated poll at a fixed interval until a
//! slot frees; callers bound the wait with a deadline. Borrowed connections
//! come back through [`PooledConnection`]'s `Drop`, so release also happens
//! on error and cancellation paths. A connection whose last call failed or
//! never finished is closed and its slot freed instead of going back to idle.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::backoff::Backoff;
use crate::connector::{Query, SourceConnection, SourceConnector};
use crate::{ConnectorError, Payload, Source};

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    pub max_size: usize,
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
    pub created: u64,
    pub discarded: u64,
    pub closed: bool,
}

struct PoolState {
    idle: Vec<Box<dyn SourceConnection>>,
    /// Open connections plus slots reserved by borrowers still connecting.
    open: usize,
    in_use: usize,
    created: u64,
    discarded: u64,
    closed: bool,
}

pub struct ConnectionPool {
    source: Arc<Source>,
    connector: Arc<dyn SourceConnector>,
    max_size: usize,
    poll: Backoff,
    state: Mutex<PoolState>,
}

enum Step {
    Reuse(Box<dyn SourceConnection>),
    Connect,
    Wait,
}

impl ConnectionPool {
    pub fn new(
        source: Arc<Source>,
        connector: Arc<dyn SourceConnector>,
        max_size: usize,
        poll: Backoff,
    ) -> Self {
        Self {
            source,
            connector,
            max_size: max_size.max(1),
            poll,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
                in_use: 0,
                created: 0,
                discarded: 0,
                closed: false,
            }),
        }
    }

    /// Borrows a connection, opening a new one if the pool is below capacity
    /// and waiting otherwise.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, ConnectorError> {
        let mut attempt = 0_u32;
        loop {
            let step = {
                let mut state = self.lock();
                if state.closed {
                    return Err(ConnectorError::new(format!(
                        "connection pool for '{}' is closed",
                        self.source.id
                    )));
                }
                if let Some(connection) = state.idle.pop() {
                    state.in_use += 1;
                    Step::Reuse(connection)
                } else if state.open < self.max_size {
                    state.open += 1;
                    state.in_use += 1;
                    Step::Connect
                } else {
                    Step::Wait
                }
            };

            match step {
                Step::Reuse(connection) => return Ok(self.guard(connection)),
                Step::Connect => {
                    let reservation = SlotReservation {
                        pool: self.as_ref(),
                        armed: true,
                    };
                    let connection = self.connector.connect(&self.source).await?;
                    reservation.commit();
                    tracing::debug!(source_id = %self.source.id, "opened pooled connection");
                    return Ok(self.guard(connection));
                }
                Step::Wait => {
                    tokio::time::sleep(self.poll.delay(attempt)).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Marks the pool closed and closes every idle connection. Connections
    /// still borrowed are dropped when they come back.
    pub async fn close(&self) {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.open -= drained.len();
            drained
        };

        let count = drained.len();
        for mut connection in drained {
            if let Err(error) = connection.close().await {
                tracing::warn!(source_id = %self.source.id, %error, "failed to close connection");
            }
        }
        tracing::debug!(source_id = %self.source.id, closed = count, "connection pool drained");
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            max_size: self.max_size,
            open: state.open,
            idle: state.idle.len(),
            in_use: state.in_use,
            created: state.created,
            discarded: state.discarded,
            closed: state.closed,
        }
    }

    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    fn guard(self: &Arc<Self>, connection: Box<dyn SourceConnection>) -> PooledConnection {
        PooledConnection {
            pool: Arc::clone(self),
            connection: Some(connection),
            reusable: true,
        }
    }

    fn release(&self, connection: Box<dyn SourceConnection>, reusable: bool) {
        {
            let mut state = self.lock();
            state.in_use -= 1;
            if reusable && !state.closed {
                state.idle.push(connection);
                return;
            }
            state.open -= 1;
            if !reusable {
                state.discarded += 1;
            }
        }
        self.close_detached(connection);
    }

    /// Closes a connection that left the pool from a synchronous `Drop`.
    /// Without a runtime the connection is simply dropped.
    fn close_detached(&self, mut connection: Box<dyn SourceConnection>) {
        let source_id = self.source.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(error) = connection.close().await {
                        tracing::warn!(%source_id, %error, "failed to close retired connection");
                    }
                });
            }
            Err(_) => {
                tracing::debug!(%source_id, "no runtime to close retired connection, dropping it");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .expect("connection pool lock is not poisoned")
    }
}

/// Holds a pool slot while a new connection is being opened and gives it
/// back if connecting fails or the borrower is cancelled.
struct SlotReservation<'a> {
    pool: &'a ConnectionPool,
    armed: bool,
}

impl SlotReservation<'_> {
    fn commit(mut self) {
        self.armed = false;
        self.pool.lock().created += 1;
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.pool.lock();
            state.open -= 1;
            state.in_use -= 1;
        }
    }
}

/// A borrowed connection. Returned to its pool on drop, or retired if its
/// last call through [`PooledConnection::execute`] or
/// [`PooledConnection::ping`] failed or was cancelled.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    connection: Option<Box<dyn SourceConnection>>,
    reusable: bool,
}

impl PooledConnection {
    pub async fn execute(&mut self, query: &Query) -> Result<Payload, ConnectorError> {
        self.reusable = false;
        let payload = (**self).execute(query).await?;
        self.reusable = true;
        Ok(payload)
    }

    pub async fn ping(&mut self) -> Result<(), ConnectorError> {
        self.reusable = false;
        (**self).ping().await?;
        self.reusable = true;
        Ok(())
    }

    /// Retires the connection instead of returning it to idle.
    pub fn discard(mut self) {
        self.reusable = false;
    }
}

impl Deref for PooledConnection {
    type Target = dyn SourceConnection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_deref()
            .expect("pooled connection is present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_deref_mut()
            .expect("pooled connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection, self.reusable);
        }
    }
}
