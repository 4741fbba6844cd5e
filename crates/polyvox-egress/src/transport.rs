//! Shared HTTP client utilities
//!
//! Every adapter builds its client here so the transport settings stay
//! uniform: rustls with mandatory peer and host verification, a bounded
//! redirect chain, TCP keepalive, and idle-pool expiry tuned below the
//! upstream providers' own idle close timers.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use polyvox_core::cancel::CancelToken;
use polyvox_core::error::{Error, ErrorKind, Result};
use reqwest::{Client, ClientBuilder, redirect::Policy};
use std::time::Duration;
use tracing::debug;

/// Hard cap on a buffered (non-streaming) response body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// HTTP client configuration shared by all remote adapters.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Whole-request timeout for non-streaming calls
    pub request_timeout_secs: u64,

    /// Whole-request timeout for streaming calls and local inference,
    /// which hold the connection open while tokens are generated
    pub streaming_timeout_secs: u64,

    pub connect_timeout_secs: u64,

    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            streaming_timeout_secs: 300,
            connect_timeout_secs: 30,
            user_agent: format!("Polyvox/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Build a client for non-streaming requests.
pub fn create_client(config: &HttpClientConfig) -> Result<Client> {
    build(config, config.request_timeout_secs)
}

/// Build a client for streaming requests (longer whole-request timeout).
pub fn create_streaming_client(config: &HttpClientConfig) -> Result<Client> {
    build(config, config.streaming_timeout_secs)
}

fn build(config: &HttpClientConfig, timeout_secs: u64) -> Result<Client> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(Policy::limited(5))
        .user_agent(&config.user_agent)
        .use_rustls_tls()
        // Keepalive prevents firewall/load balancer timeouts mid-request;
        // idle expiry stays below the 60-120s window where upstream
        // providers close pooled connections on their side.
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| Error::new(ErrorKind::Unknown, format!("failed to create HTTP client: {e}")))
}

/// Map a transport-level reqwest failure onto the error taxonomy.
pub fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(format!("request timed out: {e}"))
    } else if e.is_connect() || e.is_request() {
        Error::network(format!("network error: {e}"))
    } else {
        Error::new(ErrorKind::Unknown, format!("transport error: {e}"))
    }
}

/// Progress hook invoked after every received chunk with the running byte
/// count. Returning `false` aborts the transfer.
pub type ProgressFn = dyn Fn(u64) -> bool + Send + Sync;

/// Read a response body chunk by chunk into a growable buffer.
///
/// The buffer is capped at [`MAX_BODY_BYTES`]; the cancel token and the
/// optional progress hook are both polled between chunks so an abort takes
/// effect mid-transfer.
pub async fn read_body_buffered(
    response: reqwest::Response,
    cancel: &CancelToken,
    progress: Option<&ProgressFn>,
) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_transport_error)?;
        if cancel.is_cancelled() {
            debug!("body read cancelled after {} bytes", buffer.len());
            return Err(Error::new(ErrorKind::Timeout, "request cancelled"));
        }
        if buffer.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(Error::new(
                ErrorKind::InvalidRequest,
                format!("response body exceeds {MAX_BODY_BYTES} byte cap"),
            ));
        }
        buffer.extend_from_slice(&chunk);
        if let Some(progress) = progress
            && !progress(buffer.len() as u64)
        {
            debug!("body read aborted by progress hook at {} bytes", buffer.len());
            return Err(Error::new(ErrorKind::Timeout, "request aborted by caller"));
        }
    }

    Ok(buffer.freeze())
}
