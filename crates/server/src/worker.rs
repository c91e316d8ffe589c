//! Worker pool: one database file, one owner.
//!
//! Workers are OS threads, each holding the open `Database` handles it owns.
//! Routing is least-busy refined by stickiness: once a path is opened in
//! worker W, every later statement for that path goes to W, so a file never
//! has two owners and no file locking is needed. A crashed worker is
//! respawned; whatever was queued on it is rejected.

use common::{DbError, DbResult};
use engine::{Database, DatabaseOptions, QueryOutput};
use serde_json::Value;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

enum Job {
    Execute {
        path: PathBuf,
        statement: String,
        params: Option<HashMap<String, Value>>,
        session: u64,
        reply: oneshot::Sender<DbResult<QueryOutput>>,
    },
    CloseDatabase {
        path: PathBuf,
        reply: oneshot::Sender<DbResult<()>>,
    },
    EndSession {
        session: u64,
    },
}

struct WorkerHandle {
    id: usize,
    sender: mpsc::Sender<Job>,
    active: Arc<AtomicUsize>,
}

struct PoolInner {
    workers: Vec<WorkerHandle>,
    /// Database path -> owning worker index.
    sticky: HashMap<PathBuf, usize>,
}

pub struct WorkerPool {
    inner: Mutex<PoolInner>,
    options: DatabaseOptions,
    timeout: Duration,
}

impl WorkerPool {
    pub fn new(worker_count: usize, options: DatabaseOptions, timeout: Duration) -> Self {
        let workers = (0..worker_count)
            .map(|id| spawn_worker(id, options.clone()))
            .collect();
        Self {
            inner: Mutex::new(PoolInner {
                workers,
                sticky: HashMap::new(),
            }),
            options,
            timeout,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.inner.lock().expect("pool lock").workers.len()
    }

    /// Route one statement to the owning (or least-busy) worker and await
    /// its result under the query deadline. On expiry the worker keeps
    /// running; its eventual result is discarded.
    pub async fn dispatch(
        &self,
        path: PathBuf,
        statement: String,
        params: Option<HashMap<String, Value>>,
        session: u64,
    ) -> DbResult<QueryOutput> {
        let (reply, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().expect("pool lock");
            let idx = inner.pick_worker(&path);
            let job = Job::Execute {
                path: path.clone(),
                statement,
                params,
                session,
                reply,
            };
            if inner.workers[idx].sender.send(job).is_err() {
                inner.respawn(idx, self.options.clone());
                return Err(DbError::WorkerCrashed(format!("worker {idx} crashed")));
            }
            inner.workers[idx].active.fetch_add(1, Ordering::SeqCst);
            inner.sticky.insert(path, idx);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                // The worker died with the job in flight.
                self.reap_dead_workers();
                Err(DbError::WorkerCrashed("worker crashed".into()))
            }
            Err(_) => Err(DbError::Timeout(format!(
                "query exceeded {} ms",
                self.timeout.as_millis()
            ))),
        }
    }

    /// Close an open database ahead of a drop. A no-op when no worker owns it.
    pub async fn close_database(&self, path: PathBuf) -> DbResult<()> {
        let (reply, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().expect("pool lock");
            let Some(idx) = inner.sticky.get(&path).copied() else {
                return Ok(());
            };
            let job = Job::CloseDatabase { path: path.clone(), reply };
            if inner.workers[idx].sender.send(job).is_err() {
                inner.respawn(idx, self.options.clone());
                return Err(DbError::WorkerCrashed(format!("worker {idx} crashed")));
            }
            inner.sticky.remove(&path);
        }
        rx.await
            .map_err(|_| DbError::WorkerCrashed("worker crashed".into()))?
    }

    /// Discard a disconnecting session's transaction state everywhere.
    pub fn end_session(&self, session: u64) {
        let inner = self.inner.lock().expect("pool lock");
        for worker in &inner.workers {
            let _ = worker.sender.send(Job::EndSession { session });
        }
    }

    /// Replace any worker whose thread has gone away.
    fn reap_dead_workers(&self) {
        let mut inner = self.inner.lock().expect("pool lock");
        let dead: Vec<usize> = inner
            .workers
            .iter()
            .filter(|w| w.sender.send(Job::EndSession { session: u64::MAX }).is_err())
            .map(|w| w.id)
            .collect();
        for idx in dead {
            inner.respawn(idx, self.options.clone());
        }
    }
}

impl PoolInner {
    /// Sticky first; otherwise the smallest active count, ties to lowest id.
    fn pick_worker(&self, path: &PathBuf) -> usize {
        if let Some(idx) = self.sticky.get(path) {
            return *idx;
        }
        self.workers
            .iter()
            .min_by_key(|w| (w.active.load(Ordering::SeqCst), w.id))
            .map(|w| w.id)
            .expect("pool has at least one worker")
    }

    fn respawn(&mut self, idx: usize, options: DatabaseOptions) {
        warn!(worker = idx, "respawning crashed worker");
        self.workers[idx] = spawn_worker(idx, options);
        // Databases owned by the dead worker are closed by the OS; route
        // them fresh on next use.
        self.sticky.retain(|_, owner| *owner != idx);
    }
}

fn spawn_worker(id: usize, options: DatabaseOptions) -> WorkerHandle {
    let (sender, receiver) = mpsc::channel::<Job>();
    let active = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&active);

    thread::Builder::new()
        .name(format!("db-worker-{id}"))
        .spawn(move || worker_loop(id, receiver, options, counter))
        .expect("spawn worker thread");

    WorkerHandle { id, sender, active }
}

/// One worker: a map of open databases and a FIFO of jobs. Statement
/// handling is synchronous; a worker serves one statement at a time.
fn worker_loop(
    id: usize,
    receiver: mpsc::Receiver<Job>,
    options: DatabaseOptions,
    active: Arc<AtomicUsize>,
) {
    let mut databases: HashMap<PathBuf, Database> = HashMap::new();

    while let Ok(job) = receiver.recv() {
        match job {
            Job::Execute {
                path,
                statement,
                params,
                session,
                reply,
            } => {
                let result = execute_on(&mut databases, &options, &path, &statement, params, session);
                active.fetch_sub(1, Ordering::SeqCst);
                if let Err(ref e) = result {
                    debug!(worker = id, error = %e, "statement failed");
                }
                let _ = reply.send(result);
            }
            Job::CloseDatabase { path, reply } => {
                let result = match databases.remove(&path) {
                    Some(db) => db.close(),
                    None => Ok(()),
                };
                let _ = reply.send(result);
            }
            Job::EndSession { session } => {
                for db in databases.values_mut() {
                    db.end_session(session);
                }
            }
        }
    }

    // Channel closed: flush everything we own on the way out.
    for (path, db) in databases {
        if let Err(e) = db.close() {
            error!(worker = id, path = %path.display(), error = %e, "close failed");
        }
    }
}

fn execute_on(
    databases: &mut HashMap<PathBuf, Database>,
    options: &DatabaseOptions,
    path: &PathBuf,
    statement: &str,
    params: Option<HashMap<String, Value>>,
    session: u64,
) -> DbResult<QueryOutput> {
    if !databases.contains_key(path) {
        let db = Database::open(path, options.clone())?;
        databases.insert(path.clone(), db);
    }
    let db = databases.get_mut(path).expect("just inserted");
    db.execute_text(statement, params.as_ref(), session)
}
