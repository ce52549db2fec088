//! Worker applying inbound commands in arrival order.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use scalesync_common::{Error, SyncFailure, SyncResult};

use crate::command::{CommandMode, InboundCommand};
use crate::ledger::{resolve_user, LedgerGateway};
use crate::orchestrator::{BatchReport, Orchestrator};

/// Request types handled by the worker.
#[derive(Debug)]
pub enum DispatchRequest {
    Command(InboundCommand),
    /// Full sync of the selected ledger user.
    FullSync,
    Shutdown,
}

/// What the worker did with a request.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Applied(BatchReport),
    /// Command not meant for the selected user.
    Ignored { reason: String },
}

type Reply = oneshot::Sender<SyncResult<DispatchOutcome>>;

/// Sending side of the command queue.
#[derive(Clone)]
pub struct CommandDispatcher {
    request_tx: mpsc::Sender<(DispatchRequest, Reply)>,
}

impl CommandDispatcher {
    /// Create a dispatcher and the handle that runs its worker.
    pub fn new() -> (Self, DispatcherHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);
        (Self { request_tx }, DispatcherHandle { request_rx })
    }

    /// Queue an inbound command and wait for it to be applied.
    pub async fn submit(&self, command: InboundCommand) -> SyncResult<DispatchOutcome> {
        self.request(DispatchRequest::Command(command)).await
    }

    pub async fn request_full_sync(&self) -> SyncResult<DispatchOutcome> {
        self.request(DispatchRequest::FullSync).await
    }

    async fn request(&self, request: DispatchRequest) -> SyncResult<DispatchOutcome> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((request, response_tx))
            .await
            .map_err(|_| not_running("dispatcher not running"))?;

        response_rx
            .await
            .map_err(|_| not_running("dispatcher dropped the request"))?
    }

    /// Stop the worker after the requests queued so far.
    pub async fn shutdown(&self) {
        let (response_tx, _) = oneshot::channel();
        let _ = self
            .request_tx
            .send((DispatchRequest::Shutdown, response_tx))
            .await;
    }
}

fn not_running(message: &str) -> SyncFailure {
    SyncFailure::unknown(Error::Unavailable(message.to_string()))
}

/// Receiving side; owns the worker loop.
pub struct DispatcherHandle {
    request_rx: mpsc::Receiver<(DispatchRequest, Reply)>,
}

impl DispatcherHandle {
    /// Run the worker until shutdown or until every sender is dropped.
    ///
    /// This should be spawned in a tokio task.
    pub async fn run(mut self, orchestrator: Arc<Orchestrator>, ledger: Arc<dyn LedgerGateway>) {
        info!("Command dispatcher started");

        while let Some((request, response_tx)) = self.request_rx.recv().await {
            let result = match request {
                DispatchRequest::Shutdown => {
                    info!("Received shutdown request");
                    break;
                }
                DispatchRequest::FullSync => orchestrator
                    .full_sync(ledger.as_ref())
                    .await
                    .map(DispatchOutcome::Applied),
                DispatchRequest::Command(command) => {
                    apply(&orchestrator, ledger.as_ref(), command).await
                }
            };
            let _ = response_tx.send(result);
        }

        info!("Command dispatcher stopped");
    }
}

async fn apply(
    orchestrator: &Orchestrator,
    ledger: &dyn LedgerGateway,
    command: InboundCommand,
) -> SyncResult<DispatchOutcome> {
    debug!("Processing {} command for user {}", command.mode, command.user_id);

    if command.is_user_scoped() {
        let selected = resolve_user(ledger).await?;
        if selected.id != command.user_id {
            let reason = format!(
                "{} for user {} ignored, selected user is {}",
                command.mode, command.user_id, selected.id
            );
            info!("{}", reason);
            return Ok(DispatchOutcome::Ignored { reason });
        }
    }

    let report = match command.mode {
        CommandMode::Insert => orchestrator.insert(command.measurement()).await,
        CommandMode::Update => orchestrator.update(command.measurement()).await,
        CommandMode::Delete => orchestrator.delete(command.date).await,
        CommandMode::Clear => orchestrator.clear().await,
    };
    Ok(DispatchOutcome::Applied(report))
}
