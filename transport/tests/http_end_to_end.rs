//! HTTP transport against a minimal in-test HTTP/1.1 responder.

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use remsh_protocol::ParsedCommand;
use remsh_transport::HttpConfig;
use remsh_transport::HttpTransport;
use remsh_transport::Transport;

/// Serve one canned response per expected request, then stop.
fn serve(listener: TcpListener, responses: Vec<(&'static str, &'static str)>) -> JoinHandle<()> {
    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 8192];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream
                .write_all(response.as_bytes())
                .await
                .expect("write response");
        }
    })
}

async fn transport_for(responses: Vec<(&'static str, &'static str)>) -> (HttpTransport, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = serve(listener, responses);
    let transport = HttpTransport::new(HttpConfig::new(format!("http://{addr}")));
    (transport, server)
}

#[tokio::test]
async fn execute_parses_the_response_body() {
    let (transport, server) = transport_for(vec![
        ("200 OK", "{}"),
        (
            "200 OK",
            "{\"success\":true,\"data\":[{\"id\":1}],\"message\":\"one row\"}",
        ),
    ])
    .await;

    transport.connect().await.expect("connect");
    assert!(transport.is_connected());

    let result = transport.send(&ParsedCommand::new("users")).await;
    assert!(result.success);
    assert_eq!(result.data, Some(json!([{"id": 1}])));
    assert_eq!(result.message.as_deref(), Some("one row"));

    server.await.expect("server");
}

#[tokio::test]
async fn non_200_with_result_body_is_authoritative() {
    let (transport, server) = transport_for(vec![
        ("200 OK", "{}"),
        (
            "500 Internal Server Error",
            "{\"success\":false,\"error\":\"backing store offline\"}",
        ),
    ])
    .await;

    transport.connect().await.expect("connect");
    let result = transport.send(&ParsedCommand::new("users")).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("backing store offline"));

    server.await.expect("server");
}

#[tokio::test]
async fn non_200_with_garbage_body_reports_the_status() {
    let (transport, server) = transport_for(vec![
        ("200 OK", "{}"),
        ("503 Service Unavailable", "<html>downstream sad</html>"),
    ])
    .await;

    transport.connect().await.expect("connect");
    let result = transport.send(&ParsedCommand::new("users")).await;
    assert!(!result.success);
    let error = result.error.expect("error");
    assert!(error.contains("503"), "{error}");
    assert!(error.contains("Invalid JSON response"), "{error}");

    server.await.expect("server");
}

#[tokio::test]
async fn ping_consults_only_the_status() {
    let (transport, server) = transport_for(vec![("204 No Content", "")]).await;
    assert!(transport.ping().await);
    server.await.expect("server");
}
