use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use futures::{stream::SplitStream, SinkExt, StreamExt};
use tokio::{net::{TcpListener, TcpStream}, sync::{mpsc::{self, error::TrySendError}, Mutex}};
use tokio_util::codec::Framed;
use toshibaac::{
    config::{init_logging, socket_addr},
    protocol::{codec::{EnvelopeCodec, RxMessage}, messages::Envelope},
};
use url::Url;


/// A local message hub
///
/// Every envelope received from a client is relayed to all other connected clients.
/// Point the CLI and any number of emulators at the same hub to try things out locally.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL to listen on for clients
    #[arg(env = "TAC_URL", default_value = "tcp+json://localhost:7001")]
    listen: Url,

    /// Log filter (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}


/// Envelopes queued per client before further ones are dropped for it.
const CLIENT_QUEUE: usize = 64;

type ClientId = usize;

struct SharedState {
    next_client_id: ClientId,
    writers: HashMap<ClientId, mpsc::Sender<Envelope>>
}

impl SharedState {
    fn new() -> Self {
        SharedState { next_client_id: 0, writers: Default::default() }
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_level.as_deref())?;

    let addr = socket_addr(&args.listen).await?;
    let listener = TcpListener::bind(addr).await
        .with_context(|| format!("failed to listen on {addr}"))?;

    let state = Arc::new(Mutex::new(SharedState::new()));

    tracing::info!("listening on {addr}");

    loop {
        let (socket, addr) = listener.accept().await?;

        socket.set_nodelay(true)?;

        let id = attach_client(socket, state.clone()).await;

        tracing::info!("new connection from {addr} attached as client {id}");
    }
}

async fn attach_client(socket: TcpStream, state: Arc<Mutex<SharedState>>) -> ClientId {
    let (mut sink, rx) = Framed::new(socket, EnvelopeCodec::new()).split();
    let (queue, mut queue_recv) = mpsc::channel::<Envelope>(CLIENT_QUEUE);

    let id = {
        let mut state = state.lock().await;

        let id = state.next_client_id;
        state.next_client_id += 1;

        state.writers.insert(id, queue);

        id
    };

    tokio::spawn(async move {
        while let Some(envelope) = queue_recv.recv().await {
            if let Err(err) = sink.send(envelope).await {
                tracing::warn!("error while writing to client {id}: {err}");
                break
            }
        }
    });

    tokio::spawn(async move {
        relay(id, rx, state).await
    });

    id
}

/// Queue `envelope` for every client except `from`, without waiting on any of them.
fn fan_out(state: &SharedState, from: ClientId, envelope: &Envelope) -> usize {
    let mut queued = 0;

    for (other_id, other) in state.writers.iter() {
        if *other_id == from { continue }

        match other.try_send(envelope.clone()) {
            Ok(()) => queued += 1,
            Err(TrySendError::Full(_)) => tracing::warn!("client {other_id} is not keeping up, envelope dropped"),
            Err(TrySendError::Closed(_)) => tracing::debug!("client {other_id} writer has stopped"),
        }
    }

    queued
}

async fn relay(id: ClientId, mut messages: SplitStream<Framed<TcpStream, EnvelopeCodec>>, state: Arc<Mutex<SharedState>>) {
    while let Some(message) = messages.next().await {
        let envelope = match message {
            Ok(RxMessage::Envelope(envelope)) => envelope,
            Ok(RxMessage::Corrupted { line, error }) => {
                tracing::warn!(client = id, %line, "not relaying unparseable line: {error}");
                continue;
            },
            Err(err) => {
                tracing::warn!(client = id, "read failed: {err}");
                break;
            }
        };

        tracing::debug!(client = id, cmd = %envelope.cmd, source = %envelope.source_id, targets = ?envelope.target_id, "relay");

        fan_out(&*state.lock().await, id, &envelope);
    }

    // socket was closed, no longer relay to it
    tracing::info!("client {id} disconnected");
    state.lock().await.writers.remove(&id);
}


#[cfg(test)]
mod tests {
    use toshibaac::protocol::{ids::*, messages::FcuToAcPayload};

    use super::*;

    fn envelope(message_id: &str) -> Envelope {
        Envelope::pack(
            &DeviceId::new("mobile-1"),
            CorrelationId::new(message_id),
            &[DeviceUniqueId::new("ac-1")],
            &FcuToAcPayload { data: "30".into() }
        ).unwrap()
    }

    #[test]
    fn test_fan_out_skips_sender_and_stalled_clients() {
        let mut state = SharedState::new();

        let (sender, mut sender_recv) = mpsc::channel(CLIENT_QUEUE);
        let (stalled, _stalled_recv) = mpsc::channel(1);
        let (healthy, mut healthy_recv) = mpsc::channel(CLIENT_QUEUE);

        state.writers.insert(0, sender);
        state.writers.insert(1, stalled);
        state.writers.insert(2, healthy);

        assert_eq!(fan_out(&state, 0, &envelope("m-1")), 2);

        // client 1 never drains its queue
        assert_eq!(fan_out(&state, 0, &envelope("m-2")), 1);
        assert_eq!(fan_out(&state, 0, &envelope("m-3")), 1);

        let received: Vec<_> = std::iter::from_fn(|| healthy_recv.try_recv().ok())
            .map(|e| e.message_id)
            .collect();
        assert_eq!(received, ["m-1", "m-2", "m-3"].map(CorrelationId::from));

        assert!(sender_recv.try_recv().is_err());
    }
}
