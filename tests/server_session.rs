//! Integration tests for the server session

#![allow(clippy::expect_used, clippy::unwrap_used)]

use futures::{SinkExt, StreamExt};
use obex_protocol::config::{ClientConfig, ServerConfig};
use obex_protocol::core::codec::ObexCodec;
use obex_protocol::core::header::{Header, HeaderId};
use obex_protocol::core::opcode::Operation;
use obex_protocol::core::packet::{ConnectParams, Packet, PacketLayout};
use obex_protocol::error::{ObexError, Result};
use obex_protocol::session::client::{ObexClient, OutgoingObject};
use obex_protocol::session::object::{ObjectMetadata, ObjectReceiver, ObjectSink, ReceivedObject};
use obex_protocol::session::server::{ObexServer, ServerState};
use obex_protocol::session::ServiceId;
use obex_protocol::utils::metrics::Metrics;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

type Peer = Framed<DuplexStream, ObexCodec>;

fn peer(io: DuplexStream) -> Peer {
    Framed::new(io, ObexCodec::new(PacketLayout::ConnectResponse))
}

async fn next_response(peer: &mut Peer) -> Packet {
    peer.next()
        .await
        .expect("server closed the stream")
        .expect("valid response")
}

/// Connect to `service` and return the response.
async fn connect(peer: &mut Peer, service: &ServiceId) -> Packet {
    peer.codec_mut().set_layout(PacketLayout::ConnectResponse);
    peer.send(Packet::connect(ConnectParams::new(4096), service.as_bytes().clone()))
        .await
        .unwrap();
    let response = next_response(peer).await;
    peer.codec_mut().set_layout(PacketLayout::Response);
    response
}

fn echo_handler(request: &Packet) -> Result<Option<Packet>> {
    match request.opcode().operation() {
        Some(Operation::Get) => Ok(Some(
            Packet::response(Operation::Success).with_header(Header::end_of_body(&b"pong"[..])),
        )),
        Some(Operation::Disconnect) => Ok(Some(Packet::response(Operation::Success))),
        _ => Ok(None),
    }
}

#[tokio::test]
async fn test_wrong_target_is_refused_until_matching_connect() {
    let (server_io, peer_io) = tokio::io::duplex(4096);
    let metrics = Arc::new(Metrics::new());
    let config = ServerConfig {
        max_packet_length: 2048,
        connection_id: Some(42),
    };
    let mut server = ObexServer::new(
        server_io,
        ServiceId::MESSAGE_ACCESS,
        echo_handler,
        config,
        CancellationToken::new(),
    )
    .with_metrics(metrics.clone());
    let task = tokio::spawn(async move {
        let result = server.run().await;
        (result, server.state())
    });

    let mut peer = peer(peer_io);

    let refused = connect(&mut peer, &ServiceId::PHONEBOOK_ACCESS).await;
    assert_eq!(refused.opcode().value(), 0xD3);
    assert_eq!(refused.encoded_len(), 3);

    // A request before connecting is refused too.
    peer.send(Packet::request(Operation::Get, true).unwrap())
        .await
        .unwrap();
    assert_eq!(next_response(&mut peer).await.opcode().value(), 0xD3);

    let accepted = connect(&mut peer, &ServiceId::MESSAGE_ACCESS).await;
    assert_eq!(accepted.opcode().value(), 0xA0);
    let params = accepted.connect_params().unwrap();
    assert_eq!(params.max_packet_length, 2048);
    assert_eq!(params.version, 0x10);
    assert_eq!(
        accepted.header(HeaderId::CONNECTION_ID).unwrap().as_u32().unwrap(),
        42
    );
    assert_eq!(
        accepted.header(HeaderId::WHO).unwrap().payload(),
        ServiceId::MESSAGE_ACCESS.as_bytes()
    );

    peer.send(Packet::request(Operation::Get, true).unwrap())
        .await
        .unwrap();
    let pong = next_response(&mut peer).await;
    assert_eq!(&pong.body_content()[..], b"pong");

    peer.send(Packet::disconnect()).await.unwrap();
    assert!(next_response(&mut peer).await.opcode().is(Operation::Success));

    let (result, state) = task.await.unwrap();
    result.unwrap();
    assert_eq!(state, ServerState::Closed);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.connects_rejected, 2);
    assert_eq!(snapshot.connects_accepted, 1);
}

#[tokio::test]
async fn test_unhandled_request_gets_not_acceptable_bytes() {
    let (server_io, mut peer_io) = tokio::io::duplex(4096);
    let mut server = ObexServer::new(
        server_io,
        ServiceId::OBJECT_PUSH,
        echo_handler,
        ServerConfig::default(),
        CancellationToken::new(),
    );
    let task = tokio::spawn(async move { server.run().await });

    Packet::connect(ConnectParams::default(), bytes::Bytes::new())
        .write(&mut peer_io)
        .await
        .unwrap();
    let response = Packet::read(&mut peer_io, PacketLayout::ConnectResponse)
        .await
        .unwrap();
    assert!(response.opcode().is(Operation::Success));
    assert!(response.try_header(HeaderId::WHO).is_none());

    Packet::request(Operation::SetPath, true)
        .unwrap()
        .write(&mut peer_io)
        .await
        .unwrap();
    let mut raw = [0u8; 3];
    peer_io.read_exact(&mut raw).await.unwrap();
    assert_eq!(raw, [0xC6, 0x00, 0x03]);

    drop(peer_io);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handler_error_ends_session() {
    let (server_io, peer_io) = tokio::io::duplex(4096);
    let handler = |_: &Packet| -> Result<Option<Packet>> { Err(ObexError::handler("storage full")) };
    let mut server = ObexServer::new(
        server_io,
        ServiceId::OBJECT_PUSH,
        handler,
        ServerConfig::default(),
        CancellationToken::new(),
    );
    let task = tokio::spawn(async move { server.run().await });

    let mut peer = peer(peer_io);
    connect(&mut peer, &ServiceId::OBJECT_PUSH).await;
    peer.send(Packet::request(Operation::Put, true).unwrap())
        .await
        .unwrap();

    match task.await.unwrap() {
        Err(ObexError::Handler(reason)) => assert_eq!(reason, "storage full"),
        other => panic!("expected handler error, got {other:?}"),
    }
    assert!(peer.next().await.is_none());
}

#[tokio::test]
async fn test_cancel_while_serving() {
    let (server_io, peer_io) = tokio::io::duplex(4096);
    let cancel = CancellationToken::new();
    let mut server = ObexServer::new(
        server_io,
        ServiceId::MESSAGE_NOTIFICATION,
        echo_handler,
        ServerConfig::default(),
        cancel.child_token(),
    );
    let task = tokio::spawn(async move { server.run().await });

    let mut peer = peer(peer_io);
    let accepted = connect(&mut peer, &ServiceId::MESSAGE_NOTIFICATION).await;
    assert!(accepted.opcode().is(Operation::Success));

    cancel.cancel();
    assert!(matches!(task.await.unwrap(), Err(ObexError::Cancelled)));
}

#[tokio::test]
async fn test_stream_end_while_waiting_for_connect() {
    let (server_io, peer_io) = tokio::io::duplex(64);
    let mut server = ObexServer::new(
        server_io,
        ServiceId::MESSAGE_ACCESS,
        echo_handler,
        ServerConfig::default(),
        CancellationToken::new(),
    );
    drop(peer_io);
    server.run().await.unwrap();
    assert_eq!(server.state(), ServerState::Closed);
}

#[derive(Clone, Default)]
struct SharedSink {
    objects: Arc<Mutex<Vec<ReceivedObject>>>,
    aborted: Arc<Mutex<Vec<ObjectMetadata>>>,
}

impl ObjectSink for SharedSink {
    fn complete(&mut self, object: ReceivedObject) -> Result<()> {
        self.objects.lock().unwrap().push(object);
        Ok(())
    }

    fn aborted(&mut self, metadata: &ObjectMetadata) {
        self.aborted.lock().unwrap().push(metadata.clone());
    }
}

#[tokio::test]
async fn test_stream_end_mid_object_notifies_sink() {
    let (server_io, peer_io) = tokio::io::duplex(4096);
    let sink = SharedSink::default();
    let metrics = Arc::new(Metrics::new());
    let receiver = ObjectReceiver::new(sink.clone()).with_metrics(metrics.clone());
    let mut server = ObexServer::new(
        server_io,
        ServiceId::OBJECT_PUSH,
        receiver,
        ServerConfig::default(),
        CancellationToken::new(),
    )
    .with_metrics(metrics.clone());
    let server_task = tokio::spawn(async move {
        let result = server.run().await;
        (result, server)
    });

    let mut peer = peer(peer_io);
    assert!(connect(&mut peer, &ServiceId::OBJECT_PUSH).await.opcode().is(Operation::Success));
    peer.send(
        Packet::request(Operation::Put, false)
            .unwrap()
            .with_header(Header::name("partial.jpg"))
            .with_header(Header::body(vec![0xFF; 200])),
    )
    .await
    .unwrap();
    assert!(next_response(&mut peer).await.opcode().is(Operation::Continue));
    drop(peer);

    let (result, server) = server_task.await.unwrap();
    result.unwrap();
    assert!(!server.handler().in_progress());

    assert!(sink.objects.lock().unwrap().is_empty());
    let aborted = sink.aborted.lock().unwrap();
    assert_eq!(aborted.len(), 1);
    assert_eq!(aborted[0].name.as_deref(), Some("partial.jpg"));
    assert_eq!(metrics.snapshot().objects_aborted, 1);
}

#[tokio::test]
async fn test_object_push_end_to_end() {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let sink = SharedSink::default();
    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();

    let receiver = ObjectReceiver::new(sink.clone()).with_progress(progress_tx);
    let server_config = ServerConfig {
        max_packet_length: 512,
        connection_id: None,
    };
    let mut server = ObexServer::new(
        server_io,
        ServiceId::OBJECT_PUSH,
        receiver,
        server_config,
        CancellationToken::new(),
    );
    let server_task = tokio::spawn(async move { server.run().await });

    let contents: Vec<u8> = b"BEGIN:VCARD\r\nFN:Ada Lovelace\r\nEND:VCARD\r\n"
        .iter()
        .copied()
        .cycle()
        .take(5000)
        .collect();

    let mut client = ObexClient::basic(client_io, ClientConfig::default(), CancellationToken::new());
    client.connect(&ServiceId::OBJECT_PUSH).await.unwrap();
    assert_eq!(client.max_packet_length(), 512);

    let object = OutgoingObject::new("ada.vcf")
        .with_mime_type("text/x-vcard")
        .with_length(contents.len() as u32);
    client.send_object(&object, &contents[..], None).await.unwrap();
    client.disconnect().await.unwrap();

    server_task.await.unwrap().unwrap();

    let objects = sink.objects.lock().unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].metadata.name.as_deref(), Some("ada.vcf"));
    assert_eq!(objects[0].metadata.mime_type.as_deref(), Some("text/x-vcard"));
    assert_eq!(objects[0].metadata.length, Some(5000));
    assert_eq!(objects[0].body.as_ref(), &contents[..]);

    let mut events = Vec::new();
    while let Ok(event) = progress_rx.try_recv() {
        events.push(event);
    }
    assert!(events.len() > 1);
    assert!(events.last().unwrap().done);
    assert_eq!(events.last().unwrap().bytes_transferred, 5000);
}
