//! Monitoring session: owns the snapshot, the id counter and the one live
//! subscription to the push channel.
//!
//! The session runs as a single task. Control requests from
//! [`SessionHandle`] and messages from the subscription reader arrive on the
//! same queue and are handled one at a time, so the reducer never runs
//! concurrently with itself. The snapshot is published through a `watch`
//! channel; readers get read-only views and are woken on every change.

use std::sync::Arc;

use futures::StreamExt as _;
use opentelemetry::KeyValue;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event::{IdGenerator, parse_payload};
use crate::model::{ConnectionStatus, WorkflowSnapshot};
use crate::telemetry::metrics;
use crate::telemetry::session::{
    record_connection_change, record_subscription, start_session_span,
};
use crate::transport::Transport;

const QUEUE_DEPTH: usize = 256;

enum Command {
    Connect {
        url: String,
        done: oneshot::Sender<()>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Reset {
        done: oneshot::Sender<()>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
    // Sent by subscription readers, tagged with their generation.
    Opened {
        generation: u64,
    },
    Message {
        generation: u64,
        text: String,
    },
    Failed {
        generation: u64,
        error: Error,
    },
    Ended {
        generation: u64,
    },
}

struct Subscription {
    generation: u64,
    url: String,
    reader: JoinHandle<()>,
}

/// The session task's state. Created and driven by [`Session::spawn`].
pub struct Session {
    id: Uuid,
    span: Span,
    transport: Arc<dyn Transport>,
    ids: IdGenerator,
    state: watch::Sender<WorkflowSnapshot>,
    inbox: mpsc::Receiver<Command>,
    // Weak so the session stops once every handle is gone. Readers get a
    // clone of it, never a strong sender.
    outbox: mpsc::WeakSender<Command>,
    subscription: Option<Subscription>,
    generation: u64,
}

impl Session {
    /// Start a session on the current tokio runtime.
    pub fn spawn(transport: impl Transport) -> SessionHandle {
        Self::spawn_with_ids(transport, IdGenerator::new())
    }

    /// Start a session with a custom id generator (fixed clocks in tests).
    pub fn spawn_with_ids(transport: impl Transport, ids: IdGenerator) -> SessionHandle {
        let id = Uuid::new_v4();
        let (commands, inbox) = mpsc::channel(QUEUE_DEPTH);
        let (state, snapshot) = watch::channel(WorkflowSnapshot::new());

        let session = Session {
            id,
            span: start_session_span(&id),
            transport: Arc::new(transport),
            ids,
            state,
            inbox,
            outbox: commands.downgrade(),
            subscription: None,
            generation: 0,
        };
        let span = session.span.clone();
        tokio::spawn(session.run().instrument(span));

        SessionHandle {
            id,
            commands,
            snapshot,
        }
    }

    async fn run(mut self) {
        info!(session_id = %self.id, "session started");

        while let Some(command) = self.inbox.recv().await {
            match command {
                Command::Connect { url, done } => {
                    self.connect(url);
                    let _ = done.send(());
                }
                Command::Disconnect { done } => {
                    self.disconnect();
                    let _ = done.send(());
                }
                Command::Reset { done } => {
                    self.reset();
                    let _ = done.send(());
                }
                Command::Shutdown { done } => {
                    self.disconnect();
                    let _ = done.send(());
                    break;
                }
                Command::Opened { generation } if self.is_current(generation) => {
                    self.set_connection(ConnectionStatus::Connected);
                }
                Command::Message { generation, text } if self.is_current(generation) => {
                    self.ingest(&text);
                }
                Command::Failed { generation, error } if self.is_current(generation) => {
                    warn!(%error, "event stream failed");
                    self.lose_subscription(error.to_string());
                }
                Command::Ended { generation } if self.is_current(generation) => {
                    info!("event stream closed by server");
                    self.lose_subscription("event stream closed by server".to_string());
                }
                _ => debug!("message from a closed subscription discarded"),
            }
        }

        self.close_subscription();
        info!("session stopped");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|sub| sub.generation == generation)
    }

    fn connect(&mut self, url: String) {
        if self.close_subscription() {
            self.set_connection(ConnectionStatus::Disconnected);
        }
        self.state.send_if_modified(|snapshot| snapshot.last_error.take().is_some());

        self.generation += 1;
        let generation = self.generation;
        record_subscription(&self.span, &url);
        metrics::subscriptions_opened().add(1, &[]);
        info!(%url, generation, "opening event stream");

        let reader = tokio::spawn(
            forward(
                Arc::clone(&self.transport),
                url.clone(),
                generation,
                self.outbox.clone(),
            )
            .instrument(self.span.clone()),
        );
        self.subscription = Some(Subscription {
            generation,
            url,
            reader,
        });
    }

    fn disconnect(&mut self) {
        self.close_subscription();
        self.set_connection(ConnectionStatus::Disconnected);
    }

    fn reset(&mut self) {
        self.disconnect();
        self.ids.reset();
        self.state.send_replace(WorkflowSnapshot::new());
        info!("session reset");
    }

    /// Abort the reader, if any. Returns whether one was open.
    fn close_subscription(&mut self) -> bool {
        let Some(sub) = self.subscription.take() else {
            return false;
        };
        sub.reader.abort();
        info!(url = %sub.url, generation = sub.generation, "event stream closed");
        true
    }

    /// The current subscription failed or ended. Status and reason are
    /// published together, and readers are woken even when the status was
    /// already disconnected.
    fn lose_subscription(&mut self, reason: String) {
        self.subscription = None;
        let from = self.state.borrow().connection;
        self.state.send_modify(|snapshot| {
            snapshot.connection = ConnectionStatus::Disconnected;
            snapshot.last_error = Some(reason);
        });
        if from != ConnectionStatus::Disconnected {
            self.record_transition(from, ConnectionStatus::Disconnected);
        }
    }

    fn set_connection(&mut self, to: ConnectionStatus) {
        let mut from = to;
        let changed = self.state.send_if_modified(|snapshot| {
            from = snapshot.connection;
            snapshot.connection = to;
            from != to
        });
        if changed {
            self.record_transition(from, to);
        }
    }

    fn record_transition(&self, from: ConnectionStatus, to: ConnectionStatus) {
        record_connection_change(&self.span, &from.to_string(), &to.to_string());
        metrics::connection_transitions().add(1, &[KeyValue::new("to", to.to_string())]);
    }

    fn ingest(&mut self, text: &str) {
        let payload = match parse_payload(text) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "dropping malformed event payload");
                metrics::payloads_dropped().add(1, &[]);
                return;
            }
        };

        let ids = &mut self.ids;
        self.state.send_modify(|snapshot| {
            let event = ids.stamp(payload);
            let type_name = event
                .kind
                .as_ref()
                .map_or("unrecognized", |kind| kind.type_name());
            debug!(id = %event.id, event_type = type_name, "event received");
            metrics::events_received().add(1, &[KeyValue::new("type", type_name)]);
            snapshot.record(event);
        });
    }
}

/// Subscription reader: opens the channel and forwards every message to the
/// session until the stream ends or the reader is aborted.
///
/// Holds only a weak sender, so an open subscription never keeps the session
/// alive once every [`SessionHandle`] is dropped.
async fn forward(
    transport: Arc<dyn Transport>,
    url: String,
    generation: u64,
    outbox: mpsc::WeakSender<Command>,
) {
    let mut messages = match transport.open(&url).await {
        Ok(messages) => messages,
        Err(error) => {
            deliver(&outbox, Command::Failed { generation, error }).await;
            return;
        }
    };

    if !deliver(&outbox, Command::Opened { generation }).await {
        return;
    }

    while let Some(item) = messages.next().await {
        let command = match item {
            Ok(text) => Command::Message { generation, text },
            Err(error) => {
                deliver(&outbox, Command::Failed { generation, error }).await;
                return;
            }
        };
        if !deliver(&outbox, command).await {
            return;
        }
    }

    deliver(&outbox, Command::Ended { generation }).await;
}

/// Send to the session if it is still running. Returns false once it is gone.
async fn deliver(outbox: &mpsc::WeakSender<Command>, command: Command) -> bool {
    match outbox.upgrade() {
        Some(sender) => sender.send(command).await.is_ok(),
        None => false,
    }
}

/// Control surface for a running session. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<WorkflowSnapshot>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Subscribe to `url`, closing any open subscription first.
    ///
    /// Returns once the subscription is requested; the connection status
    /// flips to connected when the channel actually opens.
    pub async fn connect(&self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        self.request(|done| Command::Connect { url, done }).await
    }

    /// Close the open subscription, if any. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|done| Command::Disconnect { done }).await
    }

    /// Disconnect, then start over with an empty snapshot and id counter.
    pub async fn reset(&self) -> Result<()> {
        self.request(|done| Command::Reset { done }).await
    }

    /// Stop the session task.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|done| Command::Shutdown { done }).await
    }

    /// A copy of the current snapshot.
    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver woken on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the snapshot satisfies `predicate`, then return a copy.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&WorkflowSnapshot) -> bool,
    ) -> Result<WorkflowSnapshot> {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| Error::SessionClosed)?;
        Ok(snapshot.clone())
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) -> Result<()> {
        let (done, ack) = oneshot::channel();
        self.commands
            .send(command(done))
            .await
            .map_err(|_| Error::SessionClosed)?;
        ack.await.map_err(|_| Error::SessionClosed)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}
