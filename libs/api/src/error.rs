/// Category of a log error. Lets the broker and the HTTP layer decide
/// how to report a failure without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogErrorKind {
    /// Backing store unreachable or a read/write failed.
    Io,
    /// A record could not be encoded or decoded.
    Format,
    /// Log used before `init()` completed.
    NotReady,
}

impl std::fmt::Display for LogErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogErrorKind::Io => f.write_str("io"),
            LogErrorKind::Format => f.write_str("format"),
            LogErrorKind::NotReady => f.write_str("not_ready"),
        }
    }
}

/// Error returned by every [`MessageLog`](crate::MessageLog) method.
///
/// Carries a [`LogErrorKind`] and a human-readable message. `From` impls
/// pick the kind automatically so backends can use `?` on std and serde
/// errors directly.
#[derive(Clone)]
pub struct LogError {
    kind: LogErrorKind,
    message: String,
}

impl LogError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: LogErrorKind::Io, message: msg.into() }
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self { kind: LogErrorKind::NotReady, message: msg.into() }
    }

    pub fn kind(&self) -> LogErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the message with context, keeping the kind.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        Self { kind: self.kind, message: format!("{ctx}: {}", self.message) }
    }
}

impl std::fmt::Debug for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for LogError {}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self { Self { kind: LogErrorKind::Io, message: e.to_string() } }
}

impl From<serde_json::Error> for LogError {
    fn from(e: serde_json::Error) -> Self { Self { kind: LogErrorKind::Format, message: e.to_string() } }
}
