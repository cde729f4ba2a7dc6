//! End-to-end tests for the line-delimited transport over in-memory pipes

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

use irsync_protocol::{
    decode, delta, encode, serve_connection, ErrorCode, HotReloadHub, MessageBody,
    ProtocolMessage, UpdatePayload,
};

struct Client {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Client {
    async fn send(&mut self, message: &ProtocolMessage) {
        self.send_raw(&encode(message).unwrap()).await;
    }

    async fn send_raw(&mut self, frame: &str) {
        self.writer.write_all(frame.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> ProtocolMessage {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("frame within timeout")
            .unwrap()
            .expect("stream open");
        decode(&line).unwrap()
    }
}

fn setup() -> (
    Arc<HotReloadHub>,
    Client,
    CancellationToken,
    tokio::task::JoinHandle<Result<(), irsync_protocol::ProtocolError>>,
) {
    let hub = Arc::new(HotReloadHub::new(Duration::from_secs(60)));
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let token = CancellationToken::new();
    let server = tokio::spawn(serve_connection(hub.clone(), server_end, token.clone()));

    let (reader, writer) = tokio::io::split(client_end);
    let client = Client {
        lines: BufReader::new(reader).lines(),
        writer,
    };
    (hub, client, token, server)
}

fn error_code(message: &ProtocolMessage) -> ErrorCode {
    match &message.body {
        MessageBody::Error { code, .. } => *code,
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_ping_and_push() {
    let (hub, mut client, token, server) = setup();

    client.send(&ProtocolMessage::connect("simulator")).await;
    let connected = client.recv().await;
    assert!(matches!(connected.body, MessageBody::Connected { .. }));
    assert_eq!(hub.session_count(), 1);

    client.send(&ProtocolMessage::ping(9)).await;
    assert_eq!(client.recv().await.body, MessageBody::Pong { nonce: 9 });

    let v1 = json!({"type": "Text", "value": "hello"});
    let report = hub.push("a:screens/Home", 1, &v1, true);
    assert_eq!(report.delivered(), 1);

    let MessageBody::Update { update } = client.recv().await.body else {
        panic!("expected update");
    };
    assert_eq!(update.payload, UpdatePayload::Full(v1.clone()));
    assert_eq!(
        client.recv().await.body,
        MessageBody::Reload {
            preserve_state: true
        }
    );

    client.send(&ProtocolMessage::ack("a:screens/Home", 1)).await;
    // The ack has no reply; a ping round trip proves it was processed
    client.send(&ProtocolMessage::ping(10)).await;
    assert_eq!(client.recv().await.body, MessageBody::Pong { nonce: 10 });

    let v2 = json!({"type": "Text", "value": "bye"});
    hub.push("a:screens/Home", 2, &v2, false);
    let MessageBody::Update { update } = client.recv().await.body else {
        panic!("expected update");
    };
    let UpdatePayload::Delta(ops) = &update.payload else {
        panic!("expected delta after ack");
    };
    assert_eq!(delta::apply(&v1, ops).unwrap(), v2);

    token.cancel();
    server.await.unwrap().unwrap();
    assert_eq!(hub.session_count(), 0);
}

#[tokio::test]
async fn test_first_frame_must_be_connect() {
    let (hub, mut client, _token, server) = setup();

    client.send(&ProtocolMessage::ping(1)).await;
    let reply = client.recv().await;
    assert_eq!(error_code(&reply), ErrorCode::NotConnected);
    assert!(server.await.unwrap().is_err());
    assert_eq!(hub.session_count(), 0);
}

#[tokio::test]
async fn test_version_mismatch_on_connect() {
    let (_hub, mut client, _token, server) = setup();

    let mut hello = ProtocolMessage::connect("future-client");
    hello.version = 2;
    client.send(&hello).await;

    assert_eq!(error_code(&client.recv().await), ErrorCode::VersionMismatch);
    assert!(server.await.unwrap().is_err());
}

#[tokio::test]
async fn test_bad_frames_get_coded_errors_and_connection_survives() {
    let (_hub, mut client, token, server) = setup();
    client.send(&ProtocolMessage::connect("editor")).await;
    let _ = client.recv().await;

    client
        .send_raw(r#"{"type":"warp","version":1,"timestamp":"2024-01-01T00:00:00Z"}"#)
        .await;
    assert_eq!(error_code(&client.recv().await), ErrorCode::UnknownMessageType);

    client.send_raw("{oops").await;
    assert_eq!(error_code(&client.recv().await), ErrorCode::Malformed);

    client.send(&ProtocolMessage::reload(true)).await;
    assert_eq!(error_code(&client.recv().await), ErrorCode::UnexpectedMessage);

    client.send(&ProtocolMessage::ping(3)).await;
    assert_eq!(client.recv().await.body, MessageBody::Pong { nonce: 3 });

    token.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_client_hangup_closes_session() {
    let (hub, mut client, _token, server) = setup();
    client.send(&ProtocolMessage::connect("editor")).await;
    let _ = client.recv().await;
    assert_eq!(hub.session_count(), 1);

    drop(client);
    server.await.unwrap().unwrap();
    assert_eq!(hub.session_count(), 0);
}
