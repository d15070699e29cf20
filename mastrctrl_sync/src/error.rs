use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("channel is not open")]
    NotOpen,
    #[error("transport task is gone")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("malformed {kind} payload: {reason}")]
    Payload { kind: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
    #[error("invalid endpoint url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme {0:?} (expected ws or wss)")]
    UnsupportedScheme(String),
    #[error("endpoint list is empty")]
    EmptyEndpoints,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session actor unavailable")]
    ActorGone,
    #[error(transparent)]
    Config(#[from] ConfigError),
}
