//! OBEX client session.
//!
//! ```text
//!   Idle --connect--> Connected --disconnect--> Disconnected
//! ```
//!
//! While connected, [`ObexClient::run_request`] drives one request to
//! completion: as long as the server answers Continue, the Body payloads are
//! collected and a bare final-bit request of the same operation asks for the
//! next part. The Success response closes the exchange and the caller gets a
//! single packet holding the whole body.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::core::codec::ObexCodec;
use crate::core::header::{Header, HeaderId, VARIABLE_HEADER_PREFIX};
use crate::core::opcode::{Opcode, Operation};
use crate::core::packet::{ConnectParams, Packet, PacketLayout, MIN_MAX_PACKET_LENGTH};
use crate::error::{ObexError, Result};
use crate::session::object::TransferProgress;
use crate::session::ServiceId;
use crate::utils::metrics::Metrics;

/// Profile-specific behaviour layered on a client session.
pub trait ClientProfile: Send {
    /// Called with the Connect response once the session is connected.
    fn on_connected(&mut self, _response: &Packet) -> Result<()> {
        Ok(())
    }
}

/// A profile with no connect-time behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicProfile;

impl ClientProfile for BasicProfile {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connected,
    Disconnected,
}

/// Describes an object pushed with [`ObexClient::send_object`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingObject {
    pub name: String,
    pub mime_type: Option<String>,
    pub length: Option<u32>,
}

impl OutgoingObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }
}

/// One client-side OBEX session.
pub struct ObexClient<S, P = BasicProfile> {
    framed: Framed<S, ObexCodec>,
    profile: P,
    config: ClientConfig,
    state: ClientState,
    connection_id: Option<u32>,
    max_packet_length: u16,
    cancel: CancellationToken,
    metrics: Option<Arc<Metrics>>,
}

impl<S> ObexClient<S, BasicProfile>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn basic(stream: S, config: ClientConfig, cancel: CancellationToken) -> Self {
        Self::new(stream, BasicProfile, config, cancel)
    }
}

impl<S, P> ObexClient<S, P>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    P: ClientProfile,
{
    pub fn new(stream: S, profile: P, config: ClientConfig, cancel: CancellationToken) -> Self {
        let codec =
            ObexCodec::new(PacketLayout::Response).with_max_frame_length(config.max_packet_length);
        Self {
            framed: Framed::new(stream, codec),
            profile,
            max_packet_length: MIN_MAX_PACKET_LENGTH,
            config,
            state: ClientState::Idle,
            connection_id: None,
            cancel,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Connection-Id from the Connect response, if the server issued one.
    pub fn connection_id(&self) -> Option<u32> {
        self.connection_id
    }

    /// Negotiated maximum packet length for outbound packets.
    pub fn max_packet_length(&self) -> u16 {
        self.max_packet_length
    }

    pub fn profile(&self) -> &P {
        &self.profile
    }

    pub fn profile_mut(&mut self) -> &mut P {
        &mut self.profile
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }

    /// Connect to `service`.
    ///
    /// # Errors
    /// - [`ObexError::AlreadyConnected`] unless the session is idle
    /// - [`ObexError::RequestFailed`] when the server refuses
    #[instrument(skip(self))]
    pub async fn connect(&mut self, service: &ServiceId) -> Result<Packet> {
        if self.state != ClientState::Idle {
            return Err(ObexError::AlreadyConnected);
        }
        if self.cancel.is_cancelled() {
            return Err(ObexError::Cancelled);
        }

        let params = ConnectParams {
            version: self.config.obex_version,
            flags: 0,
            max_packet_length: self.config.max_packet_length,
        };
        let request = Packet::connect(params, service.as_bytes().clone());

        self.framed
            .codec_mut()
            .set_layout(PacketLayout::ConnectResponse);
        let exchanged = self.exchange(&request).await;
        self.framed.codec_mut().set_layout(PacketLayout::Response);
        let response = exchanged?;

        if !response.opcode().is(Operation::Success) {
            return Err(self.failed(response.opcode()));
        }

        self.connection_id = response
            .try_header(HeaderId::CONNECTION_ID)
            .map(Header::as_u32)
            .transpose()?;
        let peer_max = response
            .connect_params()
            .map_or(MIN_MAX_PACKET_LENGTH, |p| p.max_packet_length);
        self.max_packet_length = self.config.max_packet_length.min(peer_max);

        self.profile.on_connected(&response)?;
        self.state = ClientState::Connected;
        info!(
            connection_id = ?self.connection_id,
            max_packet_length = self.max_packet_length,
            "Connected"
        );
        Ok(response)
    }

    /// Send `request` and follow Continue responses until the server answers
    /// Success.
    ///
    /// The returned packet carries the headers of the first response, the
    /// final response opcode, and the whole body as one End-Of-Body header.
    /// The Connection-Id is added to `request` when the server issued one.
    ///
    /// # Errors
    /// - [`ObexError::NotConnected`] unless connected
    /// - [`ObexError::Cancelled`] if the token fired; nothing is written when
    ///   it fired before the call, an Abort is sent when it fired between
    ///   packets
    /// - [`ObexError::RequestFailed`] for any other response code
    #[instrument(skip(self, request), fields(opcode = %request.opcode()))]
    pub async fn run_request(&mut self, mut request: Packet) -> Result<Packet> {
        self.ensure_connected()?;
        if self.cancel.is_cancelled() {
            return Err(ObexError::Cancelled);
        }
        self.stamp_connection_id(&mut request);

        let continuation = request.continuation()?;
        let mut next = request;
        let mut first_headers = None;
        let mut body = BytesMut::new();
        let mut round_trips = 0usize;

        loop {
            if round_trips > 0 && self.cancel.is_cancelled() {
                self.send_abort().await;
                return Err(ObexError::Cancelled);
            }

            let response = self.exchange(&next).await?;
            round_trips += 1;
            if first_headers.is_none() {
                first_headers = Some(response.headers().clone());
            }

            match response.opcode().operation() {
                Some(Operation::Continue) => {
                    if let Some(chunk) = response.try_header(HeaderId::BODY) {
                        body.extend_from_slice(chunk.payload());
                    }
                    next = continuation.clone();
                }
                Some(Operation::Success) => {
                    if let Some(chunk) = response.try_header(HeaderId::END_OF_BODY) {
                        body.extend_from_slice(chunk.payload());
                    }
                    debug!(round_trips, bytes = body.len(), "Request complete");

                    let mut aggregate =
                        Packet::with_headers(response.opcode(), first_headers.unwrap_or_default());
                    aggregate.remove_header(HeaderId::BODY);
                    aggregate.add_header(Header::end_of_body(body.freeze()));
                    return Ok(aggregate);
                }
                _ => return Err(self.failed(response.opcode())),
            }
        }
    }

    /// Cancel the session's token and tell the server, without waiting for
    /// its reply. Calling it again only resends the Abort.
    #[instrument(skip(self))]
    pub async fn abort(&mut self) {
        self.cancel.cancel();
        self.send_abort().await;
    }

    /// Disconnect from the server. The session can't be connected again.
    #[instrument(skip(self))]
    pub async fn disconnect(&mut self) -> Result<Packet> {
        self.ensure_connected()?;
        let mut request = Packet::disconnect();
        self.stamp_connection_id(&mut request);

        let response = self.exchange(&request).await;
        self.state = ClientState::Disconnected;
        let response = response?;
        if !response.opcode().is(Operation::Success) {
            return Err(self.failed(response.opcode()));
        }
        info!("Disconnected");
        Ok(response)
    }

    /// Push an object read from `reader` with a chunked PUT.
    ///
    /// Name, Type and Length go in the first packet. Each packet is filled up
    /// to the negotiated maximum packet length. A progress event is sent for
    /// every acknowledged packet.
    ///
    /// # Errors
    /// Same as [`ObexClient::run_request`]; a cancelled push sends Abort.
    #[instrument(skip(self, reader, progress), fields(name = %object.name))]
    pub async fn send_object<R>(
        &mut self,
        object: &OutgoingObject,
        mut reader: R,
        progress: Option<&UnboundedSender<TransferProgress>>,
    ) -> Result<Packet>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_connected()?;
        if self.cancel.is_cancelled() {
            return Err(ObexError::Cancelled);
        }

        let mut request = Packet::request(Operation::Put, false)?;
        self.stamp_connection_id(&mut request);
        request.add_header(Header::name(&object.name));
        if let Some(mime) = &object.mime_type {
            request.add_header(Header::mime_type(mime));
        }
        if let Some(length) = object.length {
            request.add_header(Header::length(length));
        }

        let mut sent = 0u64;
        let mut first = true;
        loop {
            if !first && self.cancel.is_cancelled() {
                self.send_abort().await;
                return Err(ObexError::Cancelled);
            }
            first = false;

            let room = (self.max_packet_length as usize)
                .checked_sub(request.encoded_len() + VARIABLE_HEADER_PREFIX)
                .filter(|room| *room > 0)
                .ok_or(ObexError::PacketTooLarge(request.encoded_len()))?;
            let (chunk, eof) = read_chunk(&mut reader, room).await?;
            sent += chunk.len() as u64;

            if eof {
                request.set_opcode(Opcode::final_of(Operation::Put));
                request.add_header(Header::end_of_body(chunk));
            } else {
                request.add_header(Header::body(chunk));
            }

            let response = self.exchange(&request).await?;
            let expected = if eof {
                Operation::Success
            } else {
                Operation::Continue
            };
            if !response.opcode().is(expected) {
                return Err(self.failed(response.opcode()));
            }

            if let Some(progress) = progress {
                let _ = progress.send(TransferProgress {
                    name: Some(object.name.clone()),
                    total_length: object.length.map(u64::from),
                    bytes_transferred: sent,
                    done: eof,
                });
            }

            if eof {
                info!(bytes = sent, "Object sent");
                return Ok(response);
            }
            request = Packet::request(Operation::Put, false)?;
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state {
            ClientState::Connected => Ok(()),
            _ => Err(ObexError::NotConnected),
        }
    }

    fn stamp_connection_id(&self, request: &mut Packet) {
        if let Some(id) = self.connection_id {
            if request.try_header(HeaderId::CONNECTION_ID).is_none() {
                request.add_header(Header::connection_id(id));
            }
        }
    }

    fn failed(&self, opcode: Opcode) -> ObexError {
        warn!(response = %opcode, "Request refused");
        if let Some(metrics) = &self.metrics {
            metrics.request_failed();
        }
        ObexError::RequestFailed(opcode)
    }

    async fn send_abort(&mut self) {
        let mut abort = Packet::abort();
        self.stamp_connection_id(&mut abort);
        if let Err(e) = self.send(&abort).await {
            debug!(error = %e, "Abort could not be sent");
        }
    }

    /// A fatal stream error ends the session.
    async fn exchange(&mut self, request: &Packet) -> Result<Packet> {
        let result = match self.send(request).await {
            Ok(()) => self.receive().await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if e.is_fatal() && self.state != ClientState::Disconnected {
                warn!(error = %e, "Stream unusable, session closed");
                self.state = ClientState::Disconnected;
            }
        }
        result
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.framed.send(packet).await?;
        if let Some(metrics) = &self.metrics {
            metrics.packet_sent(packet.encoded_len() as u64);
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Packet> {
        let packet = self
            .framed
            .next()
            .await
            .ok_or(ObexError::ConnectionClosed)??;
        if let Some(metrics) = &self.metrics {
            metrics.packet_received(packet.encoded_len() as u64);
        }
        Ok(packet)
    }
}

/// Read up to `room` bytes. The flag is true once `reader` is exhausted.
async fn read_chunk<R>(reader: &mut R, room: usize) -> Result<(Bytes, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(room);
    while buf.len() < room {
        let want = (room - buf.len()) as u64;
        if (&mut *reader).take(want).read_buf(&mut buf).await? == 0 {
            return Ok((buf.freeze(), true));
        }
    }
    Ok((buf.freeze(), false))
}
