//! Single persistence writer.
//!
//! Strategy workers never touch the store. They submit snapshots to this
//! task, which writes them one at a time. When several snapshots of the same
//! trader are queued only the newest is written.

use super::snapshot::PersistedSnapshot;
use super::store::{PersistenceError, SnapshotStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

enum WriterCommand {
    Save(Box<PersistedSnapshot>),
    /// Acknowledged once everything submitted before it is written.
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the writer task.
#[derive(Clone)]
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl PersistenceWriter {
    /// Spawn the writer task on the current runtime.
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(store, rx));
        (Self { tx }, handle)
    }

    /// Queue a snapshot. Never blocks.
    pub fn submit(&self, snapshot: PersistedSnapshot) -> Result<(), PersistenceError> {
        self.tx
            .send(WriterCommand::Save(Box::new(snapshot)))
            .map_err(|_| PersistenceError::Closed)
    }

    /// Wait until every snapshot submitted so far has been written (or has failed).
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(ack))
            .map_err(|_| PersistenceError::Closed)?;
        done.await.map_err(|_| PersistenceError::Closed)
    }

    /// Flush and stop the writer.
    pub async fn shutdown(&self) -> Result<(), PersistenceError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriterCommand::Shutdown(ack))
            .map_err(|_| PersistenceError::Closed)?;
        done.await.map_err(|_| PersistenceError::Closed)
    }
}

async fn run_writer(store: Arc<dyn SnapshotStore>, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    info!("💾 Persistence writer started");

    while let Some(command) = rx.recv().await {
        let mut pending: HashMap<String, PersistedSnapshot> = HashMap::new();
        let mut acks = Vec::new();
        let mut stop = None;

        let mut next = Some(command);
        while let Some(command) = next.take() {
            match command {
                WriterCommand::Save(snapshot) => {
                    pending.insert(snapshot.trader_id.clone(), *snapshot);
                }
                WriterCommand::Flush(ack) => acks.push(ack),
                WriterCommand::Shutdown(ack) => {
                    stop = Some(ack);
                    break;
                }
            }
            next = rx.try_recv().ok();
        }

        write_all(&store, pending).await;

        for ack in acks {
            let _ = ack.send(());
        }
        if let Some(ack) = stop {
            info!("💾 Persistence writer stopped");
            let _ = ack.send(());
            return;
        }
    }

    debug!("Persistence writer channel closed");
}

async fn write_all(store: &Arc<dyn SnapshotStore>, pending: HashMap<String, PersistedSnapshot>) {
    if pending.is_empty() {
        return;
    }

    let store = Arc::clone(store);
    let result = tokio::task::spawn_blocking(move || {
        for snapshot in pending.values() {
            if let Err(e) = store.save(snapshot) {
                // The in-memory account stays authoritative; the next
                // snapshot of this trader retries the write.
                error!(trader = %snapshot.trader_id, error = %e, "Failed to persist snapshot");
            }
        }
    })
    .await;

    if let Err(e) = result {
        error!(error = %e, "Persistence write task failed");
    }
}
