use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Where the worker should open its connection.
enum Location {
    File(PathBuf),
    Memory,
}

impl Location {
    fn describe(&self) -> String {
        match self {
            Location::File(path) => path.display().to_string(),
            Location::Memory => ":memory:".to_string(),
        }
    }
}

/// The worker thread and the only way to reach it. Dropping the sender ends the thread.
struct Worker {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.join() {
                error!("Scan database thread panicked: {err:?}");
            }
        }
    }
}

/// Scan records in SQLite. rusqlite connections are not `Sync`, so one dedicated thread owns
/// the connection and async callers queue closures onto it, each answered over a oneshot.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Option<Arc<PathBuf>>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let worker = spawn_worker(Location::File(db_path.clone()))?;
        info!("Scan database ready at {}", db_path.display());
        Ok(Self {
            worker: Arc::new(worker),
            path: Some(Arc::new(db_path)),
        })
    }

    /// A private database that lives as long as its last clone.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            worker: Arc::new(spawn_worker(Location::Memory)?),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // The caller may have been cancelled; its answer is simply dropped.
            let _ = reply_tx.send(task(conn));
        });

        {
            let jobs = self
                .worker
                .jobs
                .lock()
                .map_err(|_| anyhow!("database job queue poisoned"))?;
            let sender = jobs
                .as_ref()
                .ok_or_else(|| anyhow!("database is shut down"))?;
            sender
                .send(job)
                .map_err(|_| anyhow!("database thread is gone"))?;
        }

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread dropped the request"))?
    }
}

fn open_connection(location: &Location) -> Result<Connection> {
    let mut conn = match location {
        Location::File(path) => Connection::open(path),
        Location::Memory => Connection::open_in_memory(),
    }
    .with_context(|| format!("failed to open SQLite database {}", location.describe()))?;

    if let Location::File(_) = location {
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            error!("Failed to enable WAL mode: {err}");
        }
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

/// Opens the connection on the new thread and waits until it is usable, so a bad path or a
/// failed migration surfaces from `Database::new` instead of the first query.
fn spawn_worker(location: Location) -> Result<Worker> {
    let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

    let thread = thread::Builder::new()
        .name("bodyscan-db".into())
        .spawn(move || {
            let mut conn = match open_connection(&location) {
                Ok(conn) => {
                    let _ = ready_tx.send(Ok(()));
                    conn
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            for job in jobs_rx {
                job(&mut conn);
            }
            info!("Scan database {} closed", location.describe());
        })
        .context("failed to spawn database thread")?;

    ready_rx
        .recv()
        .context("database thread exited before it was ready")??;

    Ok(Worker {
        jobs: Mutex::new(Some(jobs_tx)),
        thread: Mutex::new(Some(thread)),
    })
}
