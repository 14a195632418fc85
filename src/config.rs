use std::{collections::BTreeMap, net::SocketAddr};

use anyhow::{bail, Context, Result};
use futures::{Sink, Stream};
use tokio::net::{lookup_host, TcpStream};
use tokio_util::codec::Framed;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use crate::protocol::{codec::{CodecError, EnvelopeCodec, RxMessage}, ids::DeviceUniqueId, messages::Envelope};

pub const DEFAULT_LOG_FILTER: &str = "toshibaac=info";


pub enum Port {
    TcpJson(TcpStream)
}


pub trait PortStream: Stream<Item = Result<RxMessage, CodecError>> + Sink<Envelope, Error = CodecError> + Send + Unpin {}

impl<T> PortStream for T
where
    T: Stream<Item = Result<RxMessage, CodecError>> + Sink<Envelope, Error = CodecError> + Send + Unpin,
{}


/// Resolve the `host:port` of a `tcp+json://` URL.
pub async fn socket_addr(url: &Url) -> Result<SocketAddr> {
    match url.scheme() {
        "tcp+json" => {
            let host = url.host_str()
                .with_context(|| format!("tcp+json requires a host to be specified in the url: {url}"))?;

            let port = url.port()
                .with_context(|| format!("tcp+json requires a port number to be specified in the url: {url}"))?;

            lookup_host((host, port)).await
                .with_context(|| format!("failed to resolve {host}"))?
                .next()
                .with_context(|| format!("{host} did not resolve to any address"))
        },
        other => {
            bail!("url scheme {other} not supported");
        }
    }
}

impl Port {
    pub async fn open(url: &Url) -> Result<Self> {
        let addr = socket_addr(url).await?;

        let stream = TcpStream::connect(addr).await
            .with_context(|| format!("failed to open tcp+json connection to: {url}"))?;

        stream.set_nodelay(true)?;

        Ok(Self::TcpJson(stream))
    }

    pub fn framed(self) -> Box<dyn PortStream> {
        match self {
            Port::TcpJson(stream) => {
                Box::new(Framed::new(stream, EnvelopeCodec::new()))
            }
        }
    }
}


/// Parse a `NAME=UNIQUE_ID` device mapping.
pub fn parse_device(s: &str) -> Result<(String, DeviceUniqueId)> {
    let (name, id) = s.split_once('=')
        .with_context(|| format!("expected NAME=UNIQUE_ID, got {s:?}"))?;

    let (name, id) = (name.trim(), id.trim());

    if name.is_empty() || id.is_empty() {
        bail!("device name and unique id must not be empty: {s:?}");
    }

    Ok((name.to_string(), DeviceUniqueId::new(id)))
}

/// Parse a list of device mappings, as given on the command line or in `TAC_DEVICES`
/// (comma separated).
pub fn parse_devices<'a>(entries: impl IntoIterator<Item = &'a str>) -> Result<BTreeMap<String, DeviceUniqueId>> {
    let mut devices = BTreeMap::new();

    for entry in entries.into_iter().flat_map(|e| e.split(',')).filter(|e| !e.trim().is_empty()) {
        let (name, id) = parse_device(entry)?;

        if devices.insert(name.clone(), id).is_some() {
            bail!("device {name} configured more than once");
        }
    }

    Ok(devices)
}


/// Install the global `tracing` subscriber.
///
/// An explicit `level` wins over `RUST_LOG`, which wins over [DEFAULT_LOG_FILTER].
pub fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log filter {directive:?}"))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("logging already initialised")?;

    Ok(())
}
