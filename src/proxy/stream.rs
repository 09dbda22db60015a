use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::{error::AppError, proxy::upstream::ByteStream};

/// Body handed to actix. Dropping it (client gone) drops whatever feeds it,
/// which closes the upstream connection or kills the remux process.
pub struct ResponseStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, AppError>> + Send>>,
}

impl ResponseStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, AppError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub fn empty() -> Self {
        Self::new(futures::stream::empty())
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}

impl Stream for ResponseStream {
    type Item = Result<Bytes, AppError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Forwards upstream chunks in order, one at a time, so the next chunk is only pulled
/// once the client has taken the previous one. A chunk gap longer than `idle_timeout`
/// or a transport error ends the stream with an error; nothing is retried.
pub fn relay_body(
    mut body: ByteStream,
    idle_timeout: Duration,
    buffer_size: usize,
    label: String,
) -> ResponseStream {
    let log_every = (buffer_size.max(1) * 160) as u64;

    ResponseStream::new(async_stream::stream! {
        let mut total_bytes = 0u64;
        let mut next_log = log_every;

        loop {
            match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(Some(Ok(chunk))) => {
                    total_bytes += chunk.len() as u64;
                    if total_bytes >= next_log {
                        debug!("Streamed {} bytes from {}", total_bytes, label);
                        next_log = total_bytes + log_every;
                    }
                    yield Ok(chunk);
                }
                Ok(Some(Err(e))) => {
                    error!("Streaming error after {} bytes from {}: {}", total_bytes, label, e);
                    yield Err(AppError::UpstreamUnreachable(format!("Stream error: {}", e)));
                    break;
                }
                Ok(None) => {
                    info!("Finished relaying {} bytes from {}", total_bytes, label);
                    break;
                }
                Err(_) => {
                    warn!(
                        "Upstream {} idle for {:?} after {} bytes, closing stream",
                        label, idle_timeout, total_bytes
                    );
                    yield Err(AppError::UpstreamTimeout(format!("no data from {}", label)));
                    break;
                }
            }
        }
    })
}
