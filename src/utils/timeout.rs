//! Timeout defaults and async timeout wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Opening the transport.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Waiting for the handshake result once the connect request is out.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// One datagram send.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Run `fut` with a deadline, mapping expiry to `err`.
pub async fn with_timeout<F, T>(duration: Duration, fut: F, err: ProtocolError) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(err),
    }
}

/// Like [`with_timeout`] with a `TransportError` naming the operation.
pub async fn with_timeout_named<F, T>(duration: Duration, fut: F, operation: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(
        duration,
        fut,
        ProtocolError::TransportError(format!(
            "{operation} timed out after {}ms",
            duration.as_millis()
        )),
    )
    .await
}
