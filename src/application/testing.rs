//! In-memory transports for exercising the engine without a network.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use url::Url;

use crate::api::client::Result;
use crate::api::{ByteStream, Transport, TransportError};

pub(crate) enum Script {
    /// Serve the chunks, then end the body cleanly.
    Body(Vec<&'static str>),
    /// Serve the chunks, then fail the body.
    Interrupted(Vec<&'static str>),
    /// Fail before any headers arrive.
    Refused(fn() -> TransportError),
    /// Headers arrive, the body never does.
    Stalled,
}

pub(crate) struct ScriptedTransport {
    pub total: Option<u64>,
    pub script: Script,
}

impl ScriptedTransport {
    pub fn body(chunks: Vec<&'static str>) -> Self {
        let total = chunks.iter().map(|c| c.len() as u64).sum();
        Self {
            total: Some(total),
            script: Script::Body(chunks),
        }
    }
}

fn chunks(parts: &[&'static str]) -> Vec<Result<Bytes>> {
    parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, _url: &Url) -> Result<(Option<u64>, ByteStream)> {
        let body: ByteStream = match &self.script {
            Script::Body(parts) => stream::iter(chunks(parts)).boxed(),
            Script::Interrupted(parts) => {
                let mut items = chunks(parts);
                items.push(Err(TransportError::Interrupted(
                    "connection reset by peer".to_string(),
                )));
                stream::iter(items).boxed()
            }
            Script::Refused(make) => return Err(make()),
            Script::Stalled => stream::pending().boxed(),
        };
        Ok((self.total, body))
    }
}
