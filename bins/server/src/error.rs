#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("message log: {0}")]
    Log(#[from] pubsub_api::LogError),

    #[error("{0}")]
    Api(#[from] topic_api_server::ApiError),

    #[error("api task: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

impl ServerError {
    /// Process exit status, sysexits(3) codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerError::Config { .. } => 78,
            ServerError::Log(_) => 74,
            ServerError::Api(topic_api_server::ApiError::Bind { .. }) => 69,
            ServerError::Api(_) | ServerError::Join(_) | ServerError::Signal(_) => 1,
        }
    }
}
