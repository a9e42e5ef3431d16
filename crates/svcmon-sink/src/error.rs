/// Batch-level delivery failures. Per-sample rejections are reported through
/// [`crate::DeliveryReport`] instead.
///
/// # Examples
///
/// ```rust
/// use svcmon_sink::error::DeliveryError;
///
/// let err = DeliveryError::Connect {
///     address: "127.0.0.1:2003".to_string(),
///     message: "connection refused".to_string(),
/// };
/// assert!(err.to_string().contains("127.0.0.1:2003"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The sink endpoint could not be reached.
    #[error("Sink: failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    /// Writing to an established connection or stream failed.
    #[error("Sink: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Delivery did not finish within the configured timeout.
    #[error("Sink: delivery timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A batch could not be encoded for the wire.
    #[error("Sink: encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Sink configuration is missing a required field or contains an invalid value.
    #[error("Sink: invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
