//! OBEX server session.
//!
//! A server session runs in two phases over one stream:
//!
//! 1. **AwaitingConnect**: every request is answered with ServiceUnavailable
//!    until a Connect arrives whose Target matches the configured service.
//! 2. **Serving**: requests are passed to a [`RequestHandler`] and its
//!    responses written back, until the peer disconnects, the stream ends,
//!    the handler fails or the session is cancelled.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::codec::ObexCodec;
use crate::core::header::{Header, HeaderId};
use crate::core::opcode::Operation;
use crate::core::packet::{ConnectParams, Packet, PacketLayout};
use crate::error::{ObexError, Result};
use crate::session::ServiceId;
use crate::utils::metrics::Metrics;

/// Answers requests once a client is connected.
///
/// Returning `Ok(None)` makes the server answer Not Acceptable. Returning an
/// error ends the session.
pub trait RequestHandler: Send {
    fn handle_request(&mut self, request: &Packet) -> Result<Option<Packet>>;

    /// Called once when a connected session ends, whether by Disconnect, end
    /// of stream, cancellation or error.
    fn session_ended(&mut self) {}
}

impl<F> RequestHandler for F
where
    F: FnMut(&Packet) -> Result<Option<Packet>> + Send,
{
    fn handle_request(&mut self, request: &Packet) -> Result<Option<Packet>> {
        self(request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    AwaitingConnect,
    Serving,
    Closed,
}

/// One server-side OBEX session.
pub struct ObexServer<S, H> {
    framed: Framed<S, ObexCodec>,
    handler: H,
    service: ServiceId,
    config: ServerConfig,
    state: ServerState,
    peer_max_packet_length: Option<u16>,
    cancel: CancellationToken,
    metrics: Option<Arc<Metrics>>,
}

impl<S, H> ObexServer<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: RequestHandler,
{
    pub fn new(
        stream: S,
        service: ServiceId,
        handler: H,
        config: ServerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let codec =
            ObexCodec::new(PacketLayout::Request).with_max_frame_length(config.max_packet_length);
        Self {
            framed: Framed::new(stream, codec),
            handler,
            service,
            config,
            state: ServerState::AwaitingConnect,
            peer_max_packet_length: None,
            cancel,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Maximum packet length the client advertised in its Connect.
    pub fn peer_max_packet_length(&self) -> Option<u16> {
        self.peer_max_packet_length
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_parts(self) -> (S, H) {
        (self.framed.into_inner(), self.handler)
    }

    /// Run the session to completion.
    ///
    /// Returns `Ok(())` when the peer disconnects or closes the stream at a
    /// packet boundary.
    ///
    /// # Errors
    /// - [`ObexError::Cancelled`] when the token fires
    /// - any error returned by the handler
    /// - stream and framing errors
    #[instrument(skip(self), fields(service = ?self.service))]
    pub async fn run(&mut self) -> Result<()> {
        let result = self.run_phases().await;
        self.state = ServerState::Closed;
        match &result {
            Ok(()) => info!("OBEX session closed"),
            Err(e) => warn!(error = %e, "OBEX session ended with error"),
        }
        if let Some(metrics) = &self.metrics {
            metrics.log_metrics();
        }
        result
    }

    async fn run_phases(&mut self) -> Result<()> {
        if !self.await_connect().await? {
            return Ok(());
        }
        let result = self.serve().await;
        self.handler.session_ended();
        result
    }

    /// Returns false if the stream ended before a matching Connect.
    async fn await_connect(&mut self) -> Result<bool> {
        while self.state == ServerState::AwaitingConnect {
            let Some(request) = self.receive().await? else {
                return Ok(false);
            };

            let target = request.try_header(HeaderId::TARGET).map(|h| &h.payload()[..]);
            if request.opcode().is(Operation::Connect) && self.service.matches(target) {
                self.peer_max_packet_length =
                    request.connect_params().map(|p| p.max_packet_length);
                let response = self.connect_response();
                self.send(&response).await?;
                if let Some(metrics) = &self.metrics {
                    metrics.connect_accepted();
                }
                info!(peer_max = ?self.peer_max_packet_length, "Client connected");
                self.state = ServerState::Serving;
            } else {
                debug!(opcode = %request.opcode(), "Rejecting request before connect");
                if let Some(metrics) = &self.metrics {
                    metrics.connect_rejected();
                }
                self.send(&Packet::response(Operation::ServiceUnavailable))
                    .await?;
            }
        }
        Ok(true)
    }

    fn connect_response(&self) -> Packet {
        let params = ConnectParams::new(self.config.max_packet_length);
        let mut response = Packet::connect_response(Operation::Success, params);
        if let Some(id) = self.config.connection_id {
            response.add_header(Header::connection_id(id));
        }
        if !self.service.is_empty() {
            response.add_header(Header::who(self.service.as_bytes().clone()));
        }
        response
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ObexError::Cancelled);
            }

            let Some(request) = self.receive().await? else {
                debug!("Peer closed the stream");
                return Ok(());
            };

            let response = self
                .handler
                .handle_request(&request)?
                .unwrap_or_else(|| Packet::response(Operation::NotAcceptable));
            self.send(&response).await?;

            if request.opcode().is(Operation::Disconnect) {
                debug!("Peer disconnected");
                return Ok(());
            }
        }
    }

    /// Next request, or None on a clean end of stream.
    async fn receive(&mut self) -> Result<Option<Packet>> {
        let next = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ObexError::Cancelled),
            next = self.framed.next() => next,
        };
        match next {
            Some(Ok(packet)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.packet_received(packet.encoded_len() as u64);
                }
                Ok(Some(packet))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.framed.send(packet).await?;
        if let Some(metrics) = &self.metrics {
            metrics.packet_sent(packet.encoded_len() as u64);
        }
        Ok(())
    }
}
