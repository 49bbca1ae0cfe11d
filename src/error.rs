/// Errors that can end a streaming session.
///
/// None of these are retried. Each one terminates the session it occurred in
/// and leaves every other session untouched; the client only ever observes
/// the socket closing.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Capture device failure: {0}")]
    Device(String),

    #[error("Transmit failed: {0}")]
    Transmit(#[source] std::io::Error),

    #[error("Encoder configuration rejected: {0}")]
    Configuration(String),

    #[error("Encoder failure: {0}")]
    Encoder(String),

    #[error("Unknown stream mode 0x{0:02x}")]
    UnknownMode(u8),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Map a short or failed handshake read to a negotiation failure.
    pub(crate) fn short_read(field: &str, err: std::io::Error) -> Self {
        StreamError::Negotiation(format!("reading {}: {}", field, err))
    }
}
