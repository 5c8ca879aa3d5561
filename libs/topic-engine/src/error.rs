use pubsub_api::LogError;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Missing or malformed input. Nothing was persisted or registered.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The message log rejected the append. No fan-out happened.
    #[error("storage: {0}")]
    Storage(#[from] LogError),
}

impl BrokerError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, BrokerError::BadRequest(_))
    }
}

/// Why one subscriber did not get a message. Contained to that
/// subscriber: counted in the fan-out report, never returned to the
/// publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    #[error("subscriber queue full")]
    Full,

    #[error("subscriber queue closed")]
    Closed,
}
