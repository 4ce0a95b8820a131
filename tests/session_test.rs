//! Integration tests for the session lifecycle over an in-memory transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowwatch::error::{Error, Result};
use flowwatch::model::{ConnectionStatus, Status, WorkflowSnapshot};
use flowwatch::session::{Session, SessionHandle};
use flowwatch::transport::{MessageStream, Transport};
use futures::future::{BoxFuture, FutureExt as _};
use futures::stream::{self, StreamExt as _};
use tokio::sync::mpsc;

type Feed = mpsc::UnboundedSender<Result<String>>;

/// Hands out pre-registered channels, one per `open`. Refuses when none left.
#[derive(Clone, Default)]
struct ChannelTransport {
    pending: Arc<Mutex<VecDeque<mpsc::UnboundedReceiver<Result<String>>>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl ChannelTransport {
    fn feed(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().unwrap().push_back(rx);
        tx
    }

    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl Transport for ChannelTransport {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<MessageStream>> {
        self.opened.lock().unwrap().push(url.to_string());
        let next = self.pending.lock().unwrap().pop_front();
        async move {
            let rx = next.ok_or_else(|| Error::Other("connection refused".to_string()))?;
            let messages = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            Ok(messages.boxed())
        }
        .boxed()
    }
}

async fn wait(
    session: &SessionHandle,
    predicate: impl FnMut(&WorkflowSnapshot) -> bool,
) -> WorkflowSnapshot {
    tokio::time::timeout(Duration::from_secs(5), session.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("session closed")
}

fn send(feed: &Feed, message: &str) {
    feed.send(Ok(message.to_string())).expect("reader gone");
}

// ---------------------------------------------------------------------------
// Connect / ingest
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_marks_connected_and_folds_messages() {
    let transport = ChannelTransport::default();
    let feed = transport.feed();
    let session = Session::spawn(transport.clone());

    session.connect("http://producer/events").await.unwrap();
    wait(&session, |s| s.is_connected()).await;

    send(&feed, r#"{"type":"crew","action":"start","crew_name":"Crew1"}"#);
    send(&feed, r#"{"type":"agent","action":"start","agent_role":"R1"}"#);
    send(&feed, r#"{"type":"tool","action":"start","tool_name":"search"}"#);
    send(
        &feed,
        r#"{"type":"tool","action":"complete","tool_name":"search","tool_output":"42"}"#,
    );
    send(&feed, r#"{"type":"agent","action":"complete","agent_role":"R1"}"#);
    send(&feed, r#"{"type":"crew","action":"complete"}"#);

    let snapshot = wait(&session, |s| s.events.len() == 6).await;
    assert!(snapshot.is_review_ready());
    assert_eq!(snapshot.agents["R1"].tools[0].output.as_deref(), Some("42"));
    assert_eq!(transport.opened(), vec!["http://producer/events"]);
}

#[tokio::test]
async fn malformed_message_is_dropped() {
    let transport = ChannelTransport::default();
    let feed = transport.feed();
    let session = Session::spawn(transport);

    session.connect("http://producer/events").await.unwrap();
    wait(&session, |s| s.is_connected()).await;
    send(&feed, r#"{"type":"agent","action":"start","agent_role":"A"}"#);
    let before = wait(&session, |s| s.events.len() == 1).await;

    send(&feed, "this is not json");
    send(&feed, r#"{"type":"task","action":"start","task_name":"T"}"#);
    let after = wait(&session, |s| s.events.len() == 2).await;

    assert_eq!(after.connection, ConnectionStatus::Connected);
    assert_eq!(after.events[0], before.events[0]);
    assert_eq!(after.events[1].seq, 2);
    assert_eq!(after.agents, before.agents);
}

#[tokio::test]
async fn subscribers_are_notified_of_changes() {
    let transport = ChannelTransport::default();
    let feed = transport.feed();
    let session = Session::spawn(transport);
    let mut updates = session.subscribe();

    session.connect("http://producer/events").await.unwrap();
    send(&feed, r#"{"type":"memory","action":"start"}"#);

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            updates.changed().await.unwrap();
            if !updates.borrow_and_update().auxiliary.is_empty() {
                break;
            }
        }
    })
    .await
    .expect("no notification");
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_without_subscription_is_a_no_op() {
    let session = Session::spawn(ChannelTransport::default());

    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();

    assert_eq!(session.snapshot(), WorkflowSnapshot::new());
}

#[tokio::test]
async fn disconnect_stops_ingesting() {
    let transport = ChannelTransport::default();
    let feed = transport.feed();
    let session = Session::spawn(transport);

    session.connect("http://producer/events").await.unwrap();
    wait(&session, |s| s.is_connected()).await;
    send(&feed, r#"{"type":"agent","action":"start","agent_role":"A"}"#);
    wait(&session, |s| s.events.len() == 1).await;

    session.disconnect().await.unwrap();
    let _ = feed.send(Ok(r#"{"type":"agent","action":"start","agent_role":"B"}"#.to_string()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.connection, ConnectionStatus::Disconnected);
    assert_eq!(snapshot.events.len(), 1);
    assert_eq!(snapshot.agents["A"].status, Status::Running);
}

#[tokio::test]
async fn reconnect_replaces_the_previous_subscription() {
    let transport = ChannelTransport::default();
    let first = transport.feed();
    let second = transport.feed();
    let session = Session::spawn(transport.clone());

    session.connect("http://one/events").await.unwrap();
    wait(&session, |s| s.is_connected()).await;
    session.connect("http://two/events").await.unwrap();
    wait(&session, |s| s.is_connected()).await;

    let _ = first.send(Ok(r#"{"type":"task","action":"start","task_name":"stale"}"#.to_string()));
    send(&second, r#"{"type":"task","action":"start","task_name":"fresh"}"#);

    let snapshot = wait(&session, |s| s.tasks.contains_key("fresh")).await;
    assert!(!snapshot.tasks.contains_key("stale"));
    assert_eq!(transport.opened(), vec!["http://one/events", "http://two/events"]);
}

#[tokio::test]
async fn reset_clears_state_and_restarts_ids() {
    let transport = ChannelTransport::default();
    let first = transport.feed();
    let second = transport.feed();
    let session = Session::spawn(transport);

    session.connect("http://producer/events").await.unwrap();
    send(&first, r#"{"type":"crew","action":"start","crew_name":"Crew1"}"#);
    send(&first, r#"{"type":"crew","action":"complete"}"#);
    wait(&session, |s| s.is_complete).await;

    session.reset().await.unwrap();
    assert_eq!(session.snapshot(), WorkflowSnapshot::new());

    session.connect("http://producer/events").await.unwrap();
    send(&second, r#"{"type":"knowledge","action":"start"}"#);
    let snapshot = wait(&session, |s| s.events.len() == 1).await;
    assert_eq!(snapshot.events[0].seq, 1);
    assert!(snapshot.events[0].id.starts_with("evt-1-"));
    assert!(!snapshot.is_complete);
}

// ---------------------------------------------------------------------------
// Transport failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_error_disconnects() {
    let transport = ChannelTransport::default();
    let feed = transport.feed();
    let session = Session::spawn(transport);

    session.connect("http://producer/events").await.unwrap();
    wait(&session, |s| s.is_connected()).await;
    send(&feed, r#"{"type":"agent","action":"start","agent_role":"A"}"#);
    feed.send(Err(Error::Other("connection reset".to_string()))).unwrap();

    let snapshot = wait(&session, |s| !s.is_connected()).await;
    assert_eq!(snapshot.events.len(), 1);
    assert_eq!(snapshot.last_error.as_deref(), Some("connection reset"));
}

#[tokio::test]
async fn stream_end_disconnects() {
    let transport = ChannelTransport::default();
    let feed = transport.feed();
    let session = Session::spawn(transport);

    session.connect("http://producer/events").await.unwrap();
    wait(&session, |s| s.is_connected()).await;
    drop(feed);

    let snapshot = wait(&session, |s| !s.is_connected()).await;
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("event stream closed by server")
    );
}

#[tokio::test]
async fn failed_open_wakes_observers_with_the_error() {
    let session = Session::spawn(ChannelTransport::default());
    let mut updates = session.subscribe();

    session.connect("http://down/events").await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), updates.changed())
        .await
        .expect("observers not woken by a failed open")
        .unwrap();

    let snapshot = updates.borrow_and_update().clone();
    assert_eq!(snapshot.connection, ConnectionStatus::Disconnected);
    assert_eq!(snapshot.last_error.as_deref(), Some("connection refused"));
}

#[tokio::test]
async fn failed_open_stays_disconnected_and_can_retry() {
    let transport = ChannelTransport::default();
    let session = Session::spawn(transport.clone());

    session.connect("http://down/events").await.unwrap();
    let failed = wait(&session, |s| s.last_error.is_some()).await;
    assert_eq!(failed.connection, ConnectionStatus::Disconnected);

    let _feed = transport.feed();
    session.connect("http://down/events").await.unwrap();
    let snapshot = wait(&session, |s| s.is_connected()).await;
    assert_eq!(snapshot.last_error, None);
}

#[tokio::test]
async fn dropping_every_handle_closes_the_subscription() {
    let transport = ChannelTransport::default();
    let feed = transport.feed();
    let session = Session::spawn(transport);

    session.connect("http://producer/events").await.unwrap();
    wait(&session, |s| s.is_connected()).await;
    let observer = session.clone();
    drop(session);
    drop(observer);

    tokio::time::timeout(Duration::from_secs(5), feed.closed())
        .await
        .expect("subscription outlived every session handle");
}

#[tokio::test]
async fn shutdown_closes_the_session() {
    let session = Session::spawn(ChannelTransport::default());
    session.shutdown().await.unwrap();

    let result = session.connect("http://producer/events").await;
    assert!(matches!(result, Err(Error::SessionClosed)));
}
