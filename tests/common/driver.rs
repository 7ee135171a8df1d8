use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use postgres_tx_retry::{
    BoxError, Driver, IsolationLevel, PoolConfig, PoolStatus, RowsAffected,
};

/// Something the memory driver was asked to do, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Acquire(usize),
    Begin(usize, IsolationLevel),
    Commit(usize),
    Rollback(usize),
    /// A statement and the connection it ran on; `None` means the pool.
    Exec(Option<usize>, String),
    Query(Option<usize>, String),
    Release(usize),
    Discard(usize),
}

/// Failures the next calls should produce.
#[derive(Default)]
pub struct Script {
    pub fail_begin: bool,
    pub fail_rollback: bool,
    pub fail_ping: bool,
    pub hang_ping: bool,
    /// Returned by successive commits, then commits succeed.
    pub commit_errors: VecDeque<BoxError>,
}

struct PoolState {
    capacity: usize,
    available: AtomicUsize,
    next_id: AtomicUsize,
    closed: AtomicBool,
    events: Mutex<Vec<Event>>,
    script: Mutex<Script>,
}

impl PoolState {
    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Pooled connection handed out by [`MemoryDriver`].
pub struct MemoryConnection {
    id: usize,
    in_transaction: bool,
    discarded: bool,
    state: Arc<PoolState>,
}

impl MemoryConnection {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if self.discarded {
            self.state.record(Event::Discard(self.id));
        } else {
            self.state.record(Event::Release(self.id));
        }
        self.state.available.fetch_add(1, Ordering::SeqCst);
    }
}

/// Result of [`MemoryDriver::execute`]. A missing count fails on read.
pub struct MemoryOutcome {
    rows: Option<u64>,
}

impl RowsAffected for MemoryOutcome {
    fn rows_affected(&self) -> Result<u64, BoxError> {
        self.rows.ok_or_else(|| "driver does not report affected rows".into())
    }
}

/// In-process stand-in for a Postgres pool.
///
/// Statements are not interpreted beyond a few keywords: `ERROR` fails the
/// statement, `NO COUNT` yields an outcome without a row count, and `EMPTY`
/// returns no rows. Otherwise every argument is echoed back as one row.
#[derive(Clone)]
pub struct MemoryDriver {
    state: Arc<PoolState>,
}

impl MemoryDriver {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(PoolState {
                capacity,
                available: AtomicUsize::new(capacity),
                next_id: AtomicUsize::new(1),
                closed: AtomicBool::new(false),
                events: Mutex::new(Vec::new()),
                script: Mutex::new(Script::default()),
            }),
        }
    }

    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.state.script.lock());
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.state.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, Event::Begin(..)))
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback(_)))
    }

    pub fn discards(&self) -> usize {
        self.count(|e| matches!(e, Event::Discard(_)))
    }

    /// Connections not currently checked out.
    pub fn available(&self) -> usize {
        self.state.available.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn statement(&self, conn: Option<&mut MemoryConnection>, sql: &str) -> Result<(), BoxError> {
        if self.is_closed() {
            return Err("pool is closed".into());
        }
        if let Some(conn) = &conn {
            if !conn.in_transaction {
                return Err("statement on a connection without a transaction".into());
            }
        }
        if sql.starts_with("ERROR") {
            return Err(format!("syntax error at or near \"{sql}\"").into());
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    type Connection = MemoryConnection;
    type Arguments = Vec<String>;
    type Row = String;
    type Outcome = MemoryOutcome;

    async fn connect(url: &str, config: &PoolConfig) -> Result<Self, BoxError> {
        let rest = url
            .strip_prefix("memory://")
            .ok_or_else(|| BoxError::from(format!("unsupported url {url}")))?;
        let driver = Self::new(config.max_open as usize);
        driver.script(|s| match rest {
            "unreachable" => s.fail_ping = true,
            "hang" => s.hang_ping = true,
            _ => {}
        });
        Ok(driver)
    }

    async fn ping(&self) -> Result<(), BoxError> {
        let (fail, hang) = {
            let script = self.state.script.lock();
            (script.fail_ping, script.hang_ping)
        };
        if hang {
            futures::future::pending::<()>().await;
        }
        if fail {
            return Err("connection refused".into());
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.state.capacity,
            idle: self.available(),
        }
    }

    async fn acquire(&self) -> Result<Self::Connection, BoxError> {
        if self.is_closed() {
            return Err("pool is closed".into());
        }
        self.state
            .available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map_err(|_| BoxError::from("pool exhausted"))?;
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.record(Event::Acquire(id));
        Ok(MemoryConnection {
            id,
            in_transaction: false,
            discarded: false,
            state: Arc::clone(&self.state),
        })
    }

    fn discard(&self, mut conn: Self::Connection) {
        conn.discarded = true;
    }

    async fn begin(
        &self,
        conn: &mut Self::Connection,
        isolation: IsolationLevel,
    ) -> Result<(), BoxError> {
        if self.state.script.lock().fail_begin {
            return Err("could not start transaction".into());
        }
        conn.in_transaction = true;
        self.state.record(Event::Begin(conn.id, isolation));
        Ok(())
    }

    async fn commit(&self, conn: &mut Self::Connection) -> Result<(), BoxError> {
        self.state.record(Event::Commit(conn.id));
        if let Some(err) = self.state.script.lock().commit_errors.pop_front() {
            return Err(err);
        }
        conn.in_transaction = false;
        Ok(())
    }

    async fn rollback(&self, conn: &mut Self::Connection) -> Result<(), BoxError> {
        self.state.record(Event::Rollback(conn.id));
        if self.state.script.lock().fail_rollback {
            return Err("server closed the connection unexpectedly".into());
        }
        conn.in_transaction = false;
        Ok(())
    }

    async fn execute(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Self::Outcome, BoxError> {
        let id = conn.as_ref().map(|c| c.id);
        self.state.record(Event::Exec(id, sql.to_string()));
        self.statement(conn, sql)?;
        let rows = if sql.starts_with("NO COUNT") {
            None
        } else {
            Some(args.len() as u64)
        };
        Ok(MemoryOutcome { rows })
    }

    async fn fetch_all(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Vec<Self::Row>, BoxError> {
        let id = conn.as_ref().map(|c| c.id);
        self.state.record(Event::Query(id, sql.to_string()));
        self.statement(conn, sql)?;
        if sql.starts_with("EMPTY") {
            return Ok(Vec::new());
        }
        Ok(args)
    }

    async fn fetch_optional(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Option<Self::Row>, BoxError> {
        let rows = self.fetch_all(conn, sql, args).await?;
        Ok(rows.into_iter().next())
    }
}
