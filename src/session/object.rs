//! Inbound object transfer.
//!
//! [`ObjectReceiver`] is a [`RequestHandler`] that assembles multi-packet PUT
//! requests into whole objects and hands each finished object to an
//! [`ObjectSink`]. What happens to the object afterwards (temporary files,
//! moving into place, parsing) is up to the sink.
//!
//! ```text
//! PUT  (Name, Length, Body)  ->  Continue
//! PUT  (Body)                ->  Continue
//! PUT* (End-Of-Body)         ->  Success   sink.complete(object)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::core::header::HeaderId;
use crate::core::opcode::Operation;
use crate::core::packet::Packet;
use crate::error::Result;
use crate::session::server::RequestHandler;
use crate::utils::metrics::Metrics;

/// Describes an object, taken from the first packet of its transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub length: Option<u32>,
}

impl ObjectMetadata {
    fn from_packet(packet: &Packet) -> Self {
        Self {
            name: packet.name(),
            mime_type: packet.mime_type(),
            length: packet
                .try_header(HeaderId::LENGTH)
                .and_then(|h| h.as_u32().ok()),
        }
    }
}

/// A fully received object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedObject {
    pub metadata: ObjectMetadata,
    pub body: Bytes,
}

/// Progress of a single object transfer, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub name: Option<String>,
    pub total_length: Option<u64>,
    pub bytes_transferred: u64,
    pub done: bool,
}

/// Receives the outcome of inbound transfers.
pub trait ObjectSink: Send {
    /// Called once per object after its first packet. Returning false
    /// answers Forbidden and drops the object.
    fn authorize(&mut self, _metadata: &ObjectMetadata) -> bool {
        true
    }

    /// Called once the final packet of an object has arrived.
    fn complete(&mut self, object: ReceivedObject) -> Result<()>;

    /// Called when a partial object is dropped by Abort, Disconnect or the end
    /// of the session.
    fn aborted(&mut self, _metadata: &ObjectMetadata) {}
}

#[derive(Debug)]
struct InboundObject {
    metadata: ObjectMetadata,
    body: BytesMut,
}

/// State of the transfer between its first and final packet.
#[derive(Debug)]
enum Inbound {
    Receiving(InboundObject),
    /// The sink refused the object; its remaining packets are dropped.
    Refused,
}

/// A [`RequestHandler`] that assembles PUT transfers.
pub struct ObjectReceiver<K> {
    sink: K,
    current: Option<Inbound>,
    progress: Option<UnboundedSender<TransferProgress>>,
    metrics: Option<Arc<Metrics>>,
}

impl<K: ObjectSink> ObjectReceiver<K> {
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            current: None,
            progress: None,
            metrics: None,
        }
    }

    /// Send a [`TransferProgress`] after every PUT packet.
    pub fn with_progress(mut self, progress: UnboundedSender<TransferProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Whether an object is partially received.
    pub fn in_progress(&self) -> bool {
        matches!(self.current, Some(Inbound::Receiving(_)))
    }

    /// Whether the remaining packets of a refused object are being dropped.
    pub fn is_refusing(&self) -> bool {
        matches!(self.current, Some(Inbound::Refused))
    }

    fn handle_put(&mut self, request: &Packet) -> Result<Packet> {
        let is_final = request.opcode().is_final();

        let mut object = match self.current.take() {
            Some(Inbound::Receiving(object)) => object,
            Some(Inbound::Refused) => {
                if !is_final {
                    self.current = Some(Inbound::Refused);
                }
                return Ok(Packet::response(Operation::Forbidden));
            }
            None => {
                let metadata = ObjectMetadata::from_packet(request);
                if !self.sink.authorize(&metadata) {
                    info!(name = ?metadata.name, "Inbound object refused");
                    if let Some(metrics) = &self.metrics {
                        metrics.object_aborted();
                    }
                    if !is_final {
                        self.current = Some(Inbound::Refused);
                    }
                    return Ok(Packet::response(Operation::Forbidden));
                }
                debug!(name = ?metadata.name, length = ?metadata.length, "Inbound object started");
                InboundObject {
                    metadata,
                    body: BytesMut::new(),
                }
            }
        };

        if is_final {
            object.body.put(request.body_content());
        } else if let Some(body) = request.try_header(HeaderId::BODY) {
            object.body.put_slice(body.payload());
        }

        self.report(&object, is_final);

        if !is_final {
            self.current = Some(Inbound::Receiving(object));
            return Ok(Packet::response(Operation::Continue));
        }

        let received = ReceivedObject {
            metadata: object.metadata,
            body: object.body.freeze(),
        };
        info!(
            name = ?received.metadata.name,
            bytes = received.body.len(),
            "Inbound object complete"
        );
        self.sink.complete(received)?;
        if let Some(metrics) = &self.metrics {
            metrics.object_completed();
        }
        Ok(Packet::response(Operation::Success))
    }

    fn discard(&mut self, reason: &str) {
        if let Some(Inbound::Receiving(object)) = self.current.take() {
            warn!(name = ?object.metadata.name, received = object.body.len(), reason, "Partial object discarded");
            self.sink.aborted(&object.metadata);
            if let Some(metrics) = &self.metrics {
                metrics.object_aborted();
            }
        }
    }

    fn report(&self, object: &InboundObject, done: bool) {
        if let Some(progress) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = progress.send(TransferProgress {
                name: object.metadata.name.clone(),
                total_length: object.metadata.length.map(u64::from),
                bytes_transferred: object.body.len() as u64,
                done,
            });
        }
    }
}

impl<K: ObjectSink> RequestHandler for ObjectReceiver<K> {
    fn handle_request(&mut self, request: &Packet) -> Result<Option<Packet>> {
        match request.opcode().operation() {
            Some(Operation::Put) => self.handle_put(request).map(Some),
            Some(Operation::Abort) => {
                self.discard("abort");
                Ok(Some(Packet::response(Operation::Success)))
            }
            Some(Operation::Disconnect) => {
                self.discard("disconnect");
                Ok(Some(Packet::response(Operation::Success)))
            }
            _ => Ok(None),
        }
    }

    fn session_ended(&mut self) {
        self.discard("session ended");
    }
}
