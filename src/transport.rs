use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{sync::{mpsc, oneshot}, task::JoinHandle};
use url::Url;

use crate::{
    bus::{EventBus, Subscription},
    config::{Port, PortStream},
    events::classify,
    protocol::{codec::{CodecError, RxMessage}, ids::DeviceId, messages::Envelope},
};

const SEND_QUEUE: usize = 32;


#[derive(Error, Debug)]
pub enum TransmitError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write message: {0}")]
    Write(#[from] CodecError),
    #[error("transport is closed")]
    Closed,
}


/// The message channel to the units.
///
/// Implementations deliver outgoing envelopes and publish every classified inbound
/// message to their subscribers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// This client's id, used as the source of outgoing messages.
    fn client_id(&self) -> &DeviceId;

    /// Start observing inbound events. Only events arriving after this call are seen.
    fn subscribe(&self) -> Subscription;

    async fn send(&self, envelope: Envelope) -> Result<(), TransmitError>;
}


type SendRequest = (Envelope, oneshot::Sender<Result<(), TransmitError>>);

/// A [Transport] over a framed socket [Port].
pub struct SocketTransport {
    client_id: DeviceId,
    bus: EventBus,
    send_requests: mpsc::Sender<SendRequest>,
    tasks: [JoinHandle<()>; 2],
}

impl SocketTransport {
    pub async fn connect(url: &Url, client_id: DeviceId) -> anyhow::Result<Self> {
        let port = Port::open(url).await?.framed();

        tracing::info!(%url, %client_id, "connected");

        Ok(Self::new(port, client_id))
    }

    pub fn new(port: Box<dyn PortStream>, client_id: DeviceId) -> Self {
        let bus = EventBus::new();
        let (mut sink, mut stream) = port.split();
        let (send_requests, mut send_requests_recv) = mpsc::channel::<SendRequest>(SEND_QUEUE);

        let reader = tokio::spawn({
            let bus = bus.clone();

            async move {
                while let Some(message) = stream.next().await {
                    match message {
                        Ok(RxMessage::Envelope(envelope)) => match classify(&envelope) {
                            Ok(event) => {
                                tracing::debug!(cmd = %envelope.cmd, source = %event.source_id, message_id = %event.message_id, "rx");
                                bus.publish(event);
                            },
                            Err(err) => {
                                tracing::warn!(source = %envelope.source_id, "dropping inbound message: {err}");
                            }
                        },
                        Ok(RxMessage::Corrupted { line, error }) => {
                            tracing::warn!(%line, "dropping unparseable line: {error}");
                        },
                        Err(err) => {
                            tracing::warn!("read failed: {err}");
                            break
                        }
                    }
                }

                tracing::info!("connection closed");
                bus.close();
            }
        });

        let writer = tokio::spawn(async move {
            while let Some((envelope, reply)) = send_requests_recv.recv().await {
                tracing::debug!(cmd = %envelope.cmd, message_id = %envelope.message_id, targets = ?envelope.target_id, "tx");

                let result = sink.send(envelope).await.map_err(TransmitError::from);
                let _ = reply.send(result);
            }
        });

        Self {
            client_id,
            bus,
            send_requests,
            tasks: [reader, writer],
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn client_id(&self) -> &DeviceId {
        &self.client_id
    }

    fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransmitError> {
        let (reply, reply_recv) = oneshot::channel();

        self.send_requests.send((envelope, reply)).await
            .map_err(|_| TransmitError::Closed)?;

        reply_recv.await.map_err(|_| TransmitError::Closed)?
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }

        self.bus.close();
    }
}
