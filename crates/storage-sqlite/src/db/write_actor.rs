use std::any::Any;

use diesel::SqliteConnection;
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};

use super::{DbConnection, DbPool};
use crate::errors::StorageError;

// A job runs against the writer's connection inside an immediate transaction.
type Job<T> = Box<dyn FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static>;

type ErasedResult = Result<Box<dyn Any + Send + 'static>, StorageError>;

/// Handle for sending jobs to the writer actor.
#[derive(Clone)]
pub struct WriteHandle {
    // Each job is a boxed closure plus a oneshot sender for the reply. The
    // Box<dyn Any + Send> erases the job's return type.
    tx: mpsc::Sender<(Job<Box<dyn Any + Send + 'static>>, oneshot::Sender<ErasedResult>)>,
}

impl WriteHandle {
    /// Executes a database job on the writer actor's dedicated connection.
    pub async fn exec<F, T>(&self, job: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static + Any,
    {
        let (ret_tx, ret_rx) = oneshot::channel();

        self.tx
            .send((
                Box::new(move |c| job(c).map(|v| Box::new(v) as Box<dyn Any + Send>)),
                ret_tx,
            ))
            .await
            .map_err(|_| StorageError::WorkerUnavailable("writer actor stopped".to_string()))?;

        let boxed = ret_rx.await.map_err(|_| {
            StorageError::WorkerUnavailable("writer actor dropped the reply".to_string())
        })??;

        boxed
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| StorageError::WorkerUnavailable("unexpected writer result type".to_string()))
    }
}

/// Spawns a background Tokio task that acts as the single writer to the
/// database. The actor owns one pooled connection and processes jobs
/// serially; it stops once every [`WriteHandle`] is dropped.
pub fn spawn_writer(pool: &DbPool) -> Result<WriteHandle, StorageError> {
    let mut conn: DbConnection = pool.get()?;
    let (tx, mut rx) =
        mpsc::channel::<(Job<Box<dyn Any + Send + 'static>>, oneshot::Sender<ErasedResult>)>(1024);

    tokio::spawn(async move {
        debug!("SQLite writer actor started");
        while let Some((job, reply_tx)) = rx.recv().await {
            let result: ErasedResult =
                conn.immediate_transaction::<_, StorageError, _>(|c| job(c));
            if let Err(e) = &result {
                warn!("SQLite write job failed: {}", e);
            }
            // The requester may have gone away; nothing to do then.
            let _ = reply_tx.send(result);
        }
        debug!("SQLite writer actor stopped");
    });

    Ok(WriteHandle { tx })
}
