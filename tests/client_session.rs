//! Integration tests for the client session against a scripted peer

#![allow(clippy::expect_used, clippy::unwrap_used)]

use futures::{SinkExt, StreamExt};
use obex_protocol::config::ClientConfig;
use obex_protocol::core::codec::ObexCodec;
use obex_protocol::core::header::{Header, HeaderId};
use obex_protocol::core::opcode::Operation;
use obex_protocol::core::packet::{ConnectParams, Packet, PacketLayout};
use obex_protocol::error::{ObexError, Result};
use obex_protocol::session::client::{
    ClientProfile, ClientState, ObexClient, OutgoingObject,
};
use obex_protocol::session::object::TransferProgress;
use obex_protocol::session::ServiceId;
use obex_protocol::utils::metrics::Metrics;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

type Peer = Framed<DuplexStream, ObexCodec>;

fn pair() -> (DuplexStream, Peer) {
    let (client_io, peer_io) = tokio::io::duplex(64 * 1024);
    (client_io, Framed::new(peer_io, ObexCodec::new(PacketLayout::Request)))
}

async fn next_request(peer: &mut Peer) -> Packet {
    peer.next()
        .await
        .expect("client closed the stream")
        .expect("valid request")
}

/// Answer the Connect with the given max packet length and Connection-Id.
async fn accept_connect(peer: &mut Peer, max_packet_length: u16, connection_id: u32) -> Packet {
    let connect = next_request(peer).await;
    assert!(connect.opcode().is(Operation::Connect));
    peer.send(
        Packet::connect_response(Operation::Success, ConnectParams::new(max_packet_length))
            .with_header(Header::connection_id(connection_id)),
    )
    .await
    .unwrap();
    connect
}

#[tokio::test]
async fn test_get_follows_continue_responses() {
    let (client_io, mut peer) = pair();

    let script = tokio::spawn(async move {
        let connect = accept_connect(&mut peer, 1024, 7).await;
        assert_eq!(
            connect.header(HeaderId::TARGET).unwrap().payload(),
            ServiceId::MESSAGE_ACCESS.as_bytes()
        );
        assert_eq!(connect.connect_params().unwrap().max_packet_length, 0xFFFF);

        let get = next_request(&mut peer).await;
        assert_eq!(get.opcode().value(), 0x83);
        assert_eq!(get.header(HeaderId::CONNECTION_ID).unwrap().as_u32().unwrap(), 7);
        assert!(get.try_header(HeaderId::TYPE).is_some());
        peer.send(
            Packet::response(Operation::Continue)
                .with_header(Header::name("listing"))
                .with_header(Header::body(&b"ABC"[..])),
        )
        .await
        .unwrap();

        let continuation = next_request(&mut peer).await;
        assert_eq!(continuation.opcode().value(), 0x83);
        assert!(continuation.headers().is_empty());
        peer.send(Packet::response(Operation::Success).with_header(Header::end_of_body(&b"DEF"[..])))
            .await
            .unwrap();
    });

    let mut client = ObexClient::basic(client_io, ClientConfig::default(), CancellationToken::new());
    client.connect(&ServiceId::MESSAGE_ACCESS).await.unwrap();
    assert_eq!(client.state(), ClientState::Connected);
    assert_eq!(client.connection_id(), Some(7));
    assert_eq!(client.max_packet_length(), 1024);

    let request = Packet::request(Operation::Get, true)
        .unwrap()
        .with_header(Header::mime_type("x-obex/folder-listing"));
    let response = client.run_request(request).await.unwrap();

    assert!(response.opcode().is(Operation::Success));
    assert_eq!(&response.body_content()[..], b"ABCDEF");
    assert!(response.try_header(HeaderId::BODY).is_none());
    assert_eq!(response.name().as_deref(), Some("listing"));

    script.await.unwrap();
}

#[tokio::test]
async fn test_get_accumulates_across_repeated_continues() {
    let (client_io, mut peer) = pair();

    let script = tokio::spawn(async move {
        accept_connect(&mut peer, 1024, 9).await;

        let get = next_request(&mut peer).await;
        assert_eq!(get.opcode().value(), 0x83);
        assert_eq!(get.header(HeaderId::CONNECTION_ID).unwrap().as_u32().unwrap(), 9);
        assert_eq!(get.name().as_deref(), Some("telecom/pb.vcf"));

        let mut continuations = 0;
        for chunk in [&b"AB"[..], &b"CD"[..]] {
            peer.send(Packet::response(Operation::Continue).with_header(Header::body(chunk)))
                .await
                .unwrap();
            let next = next_request(&mut peer).await;
            assert_eq!(next.opcode().value(), 0x83);
            assert!(next.headers().is_empty());
            continuations += 1;
        }
        peer.send(Packet::response(Operation::Success).with_header(Header::end_of_body(&b"EF"[..])))
            .await
            .unwrap();
        continuations
    });

    let mut client = ObexClient::basic(client_io, ClientConfig::default(), CancellationToken::new());
    client.connect(&ServiceId::PHONEBOOK_ACCESS).await.unwrap();

    let request = Packet::request(Operation::Get, true)
        .unwrap()
        .with_header(Header::name("telecom/pb.vcf"));
    let response = client.run_request(request).await.unwrap();

    assert!(response.opcode().is(Operation::Success));
    assert_eq!(&response.body_content()[..], b"ABCDEF");
    assert_eq!(script.await.unwrap(), 2);
    assert_eq!(client.state(), ClientState::Connected);
}

#[tokio::test]
async fn test_peer_hangup_ends_session() {
    let (client_io, mut peer) = pair();

    let script = tokio::spawn(async move {
        accept_connect(&mut peer, 1024, 1).await;
        let _get = next_request(&mut peer).await;
        // Closes without answering.
    });

    let mut client = ObexClient::basic(client_io, ClientConfig::default(), CancellationToken::new());
    client.connect(&ServiceId::OBJECT_PUSH).await.unwrap();

    let result = client
        .run_request(Packet::request(Operation::Get, true).unwrap())
        .await;
    script.await.unwrap();
    assert!(matches!(result, Err(ObexError::ConnectionClosed)));
    assert_eq!(client.state(), ClientState::Disconnected);

    let again = client
        .run_request(Packet::request(Operation::Get, true).unwrap())
        .await;
    assert!(matches!(again, Err(ObexError::NotConnected)));
    assert!(matches!(client.disconnect().await, Err(ObexError::NotConnected)));
}

#[tokio::test]
async fn test_cancelled_before_request_writes_nothing() {
    let (client_io, mut peer) = pair();
    let cancel = CancellationToken::new();

    let script = tokio::spawn(async move {
        accept_connect(&mut peer, 4096, 1).await;
        // Nothing else may arrive before the client goes away.
        assert!(peer.next().await.is_none());
    });

    let mut client = ObexClient::basic(client_io, ClientConfig::default(), cancel.clone());
    client.connect(&ServiceId::MESSAGE_ACCESS).await.unwrap();

    cancel.cancel();
    let request = Packet::request(Operation::Get, true).unwrap();
    assert!(matches!(
        client.run_request(request).await,
        Err(ObexError::Cancelled)
    ));
    drop(client);

    script.await.unwrap();
}

#[tokio::test]
async fn test_cancelled_between_packets_sends_abort() {
    let (client_io, mut peer) = pair();
    let cancel = CancellationToken::new();
    let peer_cancel = cancel.clone();

    let script = tokio::spawn(async move {
        accept_connect(&mut peer, 4096, 1).await;
        next_request(&mut peer).await;
        peer_cancel.cancel();
        peer.send(Packet::response(Operation::Continue).with_header(Header::body(&b"AB"[..])))
            .await
            .unwrap();

        let abort = next_request(&mut peer).await;
        assert_eq!(abort.opcode().value(), 0xFF);
    });

    let mut client = ObexClient::basic(client_io, ClientConfig::default(), cancel);
    client.connect(&ServiceId::MESSAGE_ACCESS).await.unwrap();
    let request = Packet::request(Operation::Get, true).unwrap();
    assert!(matches!(
        client.run_request(request).await,
        Err(ObexError::Cancelled)
    ));

    script.await.unwrap();
}

#[tokio::test]
async fn test_failure_response_keeps_session_usable() {
    let (client_io, mut peer) = pair();
    let metrics = Arc::new(Metrics::new());

    let script = tokio::spawn(async move {
        accept_connect(&mut peer, 4096, 1).await;
        next_request(&mut peer).await;
        peer.send(Packet::response(Operation::NotFound)).await.unwrap();
        next_request(&mut peer).await;
        peer.send(Packet::response(Operation::Success).with_header(Header::end_of_body(&b"ok"[..])))
            .await
            .unwrap();
    });

    let mut client = ObexClient::basic(client_io, ClientConfig::default(), CancellationToken::new())
        .with_metrics(metrics.clone());
    client.connect(&ServiceId::PHONEBOOK_ACCESS).await.unwrap();

    let request = Packet::request(Operation::Get, true).unwrap();
    match client.run_request(request.clone()).await {
        Err(ObexError::RequestFailed(opcode)) => assert_eq!(opcode.value(), 0xC4),
        other => panic!("expected RequestFailed, got {other:?}"),
    }
    let response = client.run_request(request).await.unwrap();
    assert_eq!(response.body_content_as_utf8(false).unwrap(), "ok");
    assert_eq!(metrics.snapshot().requests_failed, 1);

    script.await.unwrap();
}

#[tokio::test]
async fn test_connect_refused() {
    let (client_io, peer_io) = tokio::io::duplex(1024);
    let script = tokio::spawn(async move {
        let mut peer = Framed::new(peer_io, ObexCodec::new(PacketLayout::Request));
        next_request(&mut peer).await;
        peer.send(Packet::response(Operation::ServiceUnavailable))
            .await
            .unwrap();
        peer
    });

    let mut client = ObexClient::basic(client_io, ClientConfig::default(), CancellationToken::new());
    match client.connect(&ServiceId::MESSAGE_ACCESS).await {
        Err(ObexError::RequestFailed(opcode)) => assert_eq!(opcode.value(), 0xD3),
        other => panic!("expected RequestFailed, got {other:?}"),
    }
    assert_eq!(client.state(), ClientState::Idle);
    script.await.unwrap();
}

#[tokio::test]
async fn test_requests_require_connection() {
    let (client_io, _peer) = pair();
    let mut client = ObexClient::basic(client_io, ClientConfig::default(), CancellationToken::new());
    let request = Packet::request(Operation::Get, true).unwrap();
    assert!(matches!(
        client.run_request(request).await,
        Err(ObexError::NotConnected)
    ));
    assert!(matches!(
        client.disconnect().await,
        Err(ObexError::NotConnected)
    ));
}

#[tokio::test]
async fn test_disconnect_then_connect_fails() {
    let (client_io, mut peer) = pair();

    let script = tokio::spawn(async move {
        accept_connect(&mut peer, 4096, 3).await;
        let disconnect = next_request(&mut peer).await;
        assert_eq!(disconnect.opcode().value(), 0x81);
        assert_eq!(
            disconnect.header(HeaderId::CONNECTION_ID).unwrap().as_u32().unwrap(),
            3
        );
        peer.send(Packet::response(Operation::Success)).await.unwrap();
    });

    let mut client = ObexClient::basic(client_io, ClientConfig::default(), CancellationToken::new());
    client.connect(&ServiceId::MESSAGE_ACCESS).await.unwrap();
    assert!(matches!(
        client.connect(&ServiceId::MESSAGE_ACCESS).await,
        Err(ObexError::AlreadyConnected)
    ));

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(matches!(
        client.connect(&ServiceId::MESSAGE_ACCESS).await,
        Err(ObexError::AlreadyConnected)
    ));

    script.await.unwrap();
}

#[derive(Default)]
struct RecordingProfile {
    connection_id: Option<u32>,
}

impl ClientProfile for RecordingProfile {
    fn on_connected(&mut self, response: &Packet) -> Result<()> {
        self.connection_id = Some(response.header(HeaderId::CONNECTION_ID)?.as_u32()?);
        Ok(())
    }
}

#[tokio::test]
async fn test_profile_hook_sees_connect_response() {
    let (client_io, mut peer) = pair();
    let script = tokio::spawn(async move {
        accept_connect(&mut peer, 4096, 0x1234).await;
    });

    let mut client = ObexClient::new(
        client_io,
        RecordingProfile::default(),
        ClientConfig::default(),
        CancellationToken::new(),
    );
    client.connect(&ServiceId::MESSAGE_NOTIFICATION).await.unwrap();
    assert_eq!(client.profile().connection_id, Some(0x1234));

    script.await.unwrap();
}

#[tokio::test]
async fn test_send_object_chunks_to_packet_length() {
    let (client_io, mut peer) = pair();
    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let script = tokio::spawn(async move {
        accept_connect(&mut peer, 300, 9).await;
        let mut received = Vec::new();
        let mut packets = 0;
        loop {
            let put = next_request(&mut peer).await;
            packets += 1;
            assert!(put.opcode().is(Operation::Put));
            assert!(put.encoded_len() <= 300);
            if packets == 1 {
                assert_eq!(put.name().as_deref(), Some("data.bin"));
                assert_eq!(put.header(HeaderId::LENGTH).unwrap().as_u32().unwrap(), 1000);
                assert_eq!(put.mime_type().as_deref(), Some("application/octet-stream"));
                assert!(put.try_header(HeaderId::CONNECTION_ID).is_some());
            } else {
                assert!(put.try_header(HeaderId::NAME).is_none());
            }
            received.extend_from_slice(&put.body_content());
            if put.opcode().is_final() {
                peer.send(Packet::response(Operation::Success)).await.unwrap();
                break;
            }
            peer.send(Packet::response(Operation::Continue)).await.unwrap();
        }
        assert!(packets > 3);
        assert_eq!(received, expected);
    });

    let mut client = ObexClient::basic(client_io, ClientConfig::default(), CancellationToken::new());
    client.connect(&ServiceId::OBJECT_PUSH).await.unwrap();
    assert_eq!(client.max_packet_length(), 300);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let object = OutgoingObject::new("data.bin")
        .with_mime_type("application/octet-stream")
        .with_length(1000);
    let response = client
        .send_object(&object, &payload[..], Some(&tx))
        .await
        .unwrap();
    assert!(response.opcode().is(Operation::Success));

    drop(tx);
    let mut last: Option<TransferProgress> = None;
    while let Some(event) = rx.recv().await {
        if let Some(previous) = &last {
            assert!(event.bytes_transferred > previous.bytes_transferred);
        }
        last = Some(event);
    }
    let last = last.expect("progress events");
    assert!(last.done);
    assert_eq!(last.bytes_transferred, 1000);
    assert_eq!(last.total_length, Some(1000));

    script.await.unwrap();
}
