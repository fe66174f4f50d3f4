//! In-memory stand-in for a MySQL server, for engine tests.
//!
//! Emulates the parts of InnoDB the engines rely on: row locks owned by the
//! open transaction of a session, savepoints, the metadata table, killed
//! connections and injected deadlocks or other server errors. Clones share one server, so two
//! engines built from clones of the same backend contend like two
//! processes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use innodb_lock_core::error::{LockError, LockResult};
use innodb_lock_mysql::session::{ER_LOCK_DEADLOCK, ER_LOCK_WAIT_TIMEOUT};
use innodb_lock_mysql::{DbError, DbResult, LockRecord, LockSession, SessionProvider};

/// `ER_SP_DOES_NOT_EXIST`, reported for unknown savepoints.
const ER_SAVEPOINT_DOES_NOT_EXIST: u16 = 1305;

const BLOCKING_POLL: Duration = Duration::from_millis(5);

struct State {
    next_connection_id: u64,
    /// Lock name to the connection whose open transaction owns the row.
    rows: HashMap<String, u64>,
    metadata: HashMap<String, LockRecord>,
    killed: HashSet<u64>,
    deadlock_on: HashSet<String>,
    /// Lock name to the error number its next claim fails with.
    injected: HashMap<String, u16>,
    wait_timeout: Duration,
    max_heap_table_size: Option<u64>,
    applied_heap_table_sizes: Vec<u64>,
    refuse_connections: bool,
    opened_lock_sessions: usize,
}

impl State {
    fn release_rows_of(&mut self, connection_id: u64) {
        self.rows.retain(|_, owner| *owner != connection_id);
    }
}

/// Shared fake server.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_connection_id: 100,
                rows: HashMap::new(),
                metadata: HashMap::new(),
                killed: HashSet::new(),
                deadlock_on: HashSet::new(),
                injected: HashMap::new(),
                wait_timeout: Duration::from_secs(31_536_000),
                max_heap_table_size: None,
                applied_heap_table_sizes: Vec::new(),
                refuse_connections: false,
                opened_lock_sessions: 0,
            })),
        }
    }

    /// Server that accepts savepoint engines.
    pub fn with_heap_table_size() -> Self {
        let backend = Self::new();
        backend.state().max_heap_table_size = Some(64 * 1024 * 1024);
        backend
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Session lifetime granted to new sessions.
    pub fn set_wait_timeout(&self, wait_timeout: Duration) {
        self.state().wait_timeout = wait_timeout;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    /// Kills a connection. Its rows are released like on a server-side
    /// rollback.
    pub fn kill(&self, connection_id: u64) {
        let mut state = self.state();
        state.killed.insert(connection_id);
        state.release_rows_of(connection_id);
    }

    /// Makes the next claim of `name` fail as a deadlock victim.
    pub fn inject_deadlock(&self, name: &str) {
        self.state().deadlock_on.insert(name.to_string());
    }

    /// Makes the next claim of `name` fail with server error `code`. The
    /// transaction stays open, like after a failed statement.
    pub fn inject_error(&self, name: &str, code: u16) {
        self.state().injected.insert(name.to_string(), code);
    }

    /// Connection owning the row of `name`, if any.
    pub fn row_owner(&self, name: &str) -> Option<u64> {
        self.state().rows.get(name).copied()
    }

    pub fn metadata(&self, name: &str) -> Option<LockRecord> {
        self.state().metadata.get(name).cloned()
    }

    pub fn metadata_len(&self) -> usize {
        self.state().metadata.len()
    }

    pub fn applied_heap_table_sizes(&self) -> Vec<u64> {
        self.state().applied_heap_table_sizes.clone()
    }

    pub fn opened_lock_sessions(&self) -> usize {
        self.state().opened_lock_sessions
    }

    fn open(&self, in_transaction: bool) -> LockResult<MockSession> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(LockError::Connection("Connection refused".into()));
        }
        let connection_id = state.next_connection_id;
        state.next_connection_id += 1;
        if in_transaction {
            state.opened_lock_sessions += 1;
        }
        Ok(MockSession {
            state: Arc::clone(&self.state),
            connection_id,
            max_lifetime: state.wait_timeout,
            in_transaction,
            blocking: true,
            owned: Vec::new(),
            savepoints: Vec::new(),
        })
    }
}

impl SessionProvider for MockBackend {
    type Session = MockSession;

    fn host(&self) -> &str {
        "mock-db"
    }

    fn max_heap_table_size(&self) -> Option<u64> {
        self.state().max_heap_table_size
    }

    async fn open_lock_session(&self) -> LockResult<MockSession> {
        self.open(true)
    }

    async fn open_metadata_session(&self) -> LockResult<MockSession> {
        self.open(false)
    }
}

/// One fake connection.
pub struct MockSession {
    state: Arc<Mutex<State>>,
    connection_id: u64,
    max_lifetime: Duration,
    in_transaction: bool,
    blocking: bool,
    /// Rows owned by the open transaction, in claim order.
    owned: Vec<String>,
    /// Savepoint name and the number of rows owned when it was taken.
    savepoints: Vec<(String, usize)>,
}

impl MockSession {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn check_alive(&self) -> DbResult<()> {
        if self.state().killed.contains(&self.connection_id) {
            return Err(DbError::new(Some(2013), Some("HY000"), "Lost connection to MySQL server during query"));
        }
        Ok(())
    }

    fn end_transaction(&mut self) {
        self.state().release_rows_of(self.connection_id);
        self.owned.clear();
        self.savepoints.clear();
        self.in_transaction = false;
    }
}

impl LockSession for MockSession {
    fn connection_id(&self) -> u64 {
        self.connection_id
    }

    fn max_session_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.check_alive()?;
        self.end_transaction();
        self.in_transaction = true;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.check_alive()?;
        self.end_transaction();
        Ok(())
    }

    async fn savepoint(&mut self, savepoint: &str) -> DbResult<()> {
        self.check_alive()?;
        self.savepoints.retain(|(name, _)| name != savepoint);
        self.savepoints.push((savepoint.to_string(), self.owned.len()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, savepoint: &str) -> DbResult<()> {
        self.check_alive()?;
        let Some(index) = self.savepoints.iter().position(|(name, _)| name == savepoint) else {
            return Err(DbError::new(
                Some(ER_SAVEPOINT_DOES_NOT_EXIST),
                Some("42000"),
                format!("SAVEPOINT {savepoint} does not exist"),
            ));
        };
        let keep = self.savepoints[index].1;
        self.savepoints.truncate(index + 1);

        let undone = self.owned.split_off(keep);
        let mut state = self.state();
        for name in undone {
            if state.rows.get(&name) == Some(&self.connection_id) {
                state.rows.remove(&name);
            }
        }
        Ok(())
    }

    async fn set_lock_wait_timeout(&mut self, blocking: bool) -> DbResult<()> {
        self.check_alive()?;
        self.blocking = blocking;
        Ok(())
    }

    async fn set_max_heap_table_size(&mut self, bytes: u64) -> DbResult<()> {
        self.check_alive()?;
        self.state().applied_heap_table_sizes.push(bytes);
        Ok(())
    }

    async fn claim_row(&mut self, name: &str) -> DbResult<()> {
        loop {
            self.check_alive()?;
            let deadlocked = {
                let mut state = self.state();
                if let Some(code) = state.injected.remove(name) {
                    return Err(DbError::new(Some(code), Some("HY000"), format!("Injected server error {code}")));
                }
                if state.deadlock_on.remove(name) {
                    true
                } else {
                    match state.rows.get(name).copied() {
                        Some(owner) if owner != self.connection_id => {
                            if !self.blocking {
                                return Err(DbError::new(
                                    Some(ER_LOCK_WAIT_TIMEOUT),
                                    Some("HY000"),
                                    "Lock wait timeout exceeded; try restarting transaction",
                                ));
                            }
                            false
                        }
                        _ => {
                            // Outside a transaction the write commits and
                            // holds nothing.
                            if self.in_transaction {
                                state.rows.insert(name.to_string(), self.connection_id);
                                drop(state);
                                if !self.owned.iter().any(|owned| owned == name) {
                                    self.owned.push(name.to_string());
                                }
                            }
                            return Ok(());
                        }
                    }
                }
            };

            if deadlocked {
                // The victim's whole transaction is rolled back.
                self.end_transaction();
                return Err(DbError::new(
                    Some(ER_LOCK_DEADLOCK),
                    Some("40001"),
                    "Deadlock found when trying to get lock; try restarting transaction",
                ));
            }

            tokio::time::sleep(BLOCKING_POLL).await;
        }
    }

    async fn write_metadata(&mut self, record: &LockRecord) -> DbResult<()> {
        self.check_alive()?;
        self.state()
            .metadata
            .insert(record.lock_name.clone(), record.clone());
        Ok(())
    }

    async fn delete_metadata(&mut self, name: &str) -> DbResult<()> {
        self.check_alive()?;
        self.state().metadata.remove(name);
        Ok(())
    }

    async fn read_metadata(&mut self, name: &str) -> DbResult<Option<LockRecord>> {
        self.check_alive()?;
        Ok(self.state().metadata.get(name).cloned())
    }

    async fn ping(&mut self) -> DbResult<()> {
        self.check_alive()
    }

    async fn close(self) {}
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.release_rows_of(self.connection_id);
        }
    }
}
