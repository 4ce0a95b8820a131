//! SSE transport against a local HTTP server.

use std::time::Duration;

use flowwatch::error::Error;
use flowwatch::session::Session;
use flowwatch::transport::{SseTransport, Transport};
use futures::StreamExt as _;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpListener;

fn transport() -> SseTransport {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    SseTransport::with_client(client)
}

/// Serve one connection with `status_line` and an SSE body, then close.
async fn serve_once(status_line: &'static str, chunks: Vec<&'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 2048];
        let _ = socket.read(&mut request).await;

        let head = format!(
            "{status_line}\r\nContent-Type: text/event-stream\r\n\
             Cache-Control: no-cache\r\nConnection: close\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        for chunk in chunks {
            socket.write_all(chunk.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = socket.shutdown().await;
    });

    format!("http://{addr}/events")
}

#[tokio::test]
async fn sse_transport_yields_message_data() {
    let url = serve_once(
        "HTTP/1.1 200 OK",
        vec![
            ": hello\n\n",
            "data: {\"type\":\"crew\",\"action\":\"start\",\"crew_name\":\"C\"}\n\n",
            "data: {\"type\":\"crew\",",
            "\"action\":\"complete\"}\n\n",
        ],
    )
    .await;

    let messages: Vec<String> = transport()
        .open(&url)
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;

    assert_eq!(
        messages,
        vec![
            r#"{"type":"crew","action":"start","crew_name":"C"}"#.to_string(),
            r#"{"type":"crew","action":"complete"}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn sse_transport_rejects_error_status() {
    let url = serve_once("HTTP/1.1 404 Not Found", vec![]).await;

    let result = transport().open(&url).await;
    assert!(matches!(result, Err(Error::Http { status: 404 })));
}

#[tokio::test]
async fn session_follows_a_live_stream_to_completion() {
    let url = serve_once(
        "HTTP/1.1 200 OK",
        vec![
            "data: {\"type\":\"crew\",\"action\":\"start\",\"crew_name\":\"Crew1\"}\n\n",
            "data: {\"type\":\"agent\",\"action\":\"start\",\"agent_role\":\"R1\"}\n\n",
            "data: {\"type\":\"tool\",\"action\":\"start\",\"tool_name\":\"search\"}\n\n",
            "data: not json\n\n",
            "data: {\"type\":\"tool\",\"action\":\"complete\",\"tool_name\":\"search\",\
             \"tool_output\":\"42\"}\n\n",
            "data: {\"type\":\"agent\",\"action\":\"complete\",\"agent_role\":\"R1\"}\n\n",
            "data: {\"type\":\"crew\",\"action\":\"complete\"}\n\n",
        ],
    )
    .await;

    let session = Session::spawn(transport());
    session.connect(url).await.unwrap();

    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        session.wait_for(|s| s.is_complete && !s.is_connected()),
    )
    .await
    .expect("timed out")
    .unwrap();

    assert!(snapshot.is_review_ready());
    assert_eq!(snapshot.events.len(), 6);
    assert_eq!(snapshot.agents["R1"].tools[0].output.as_deref(), Some("42"));
}
