use thiserror::Error;

/// Semantic, transport-agnostic error kinds shared by client and server.
#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("not found")]
    NotFound,

    #[error("not authorized")]
    NotAuthenticated,

    #[error("invalid body")]
    InvalidBody,

    #[error("email already taken")]
    EmailAlreadyTaken,

    #[error("wrong credentials")]
    WrongCredentials,

    #[error("unknown data kind: {0}")]
    UnknownKind(String),

    /// Per-record fatal: bad envelope, failed auth tag, undecodable body.
    #[error("integrity failure: {0}")]
    Integrity(&'static str),

    /// Any transport error or non-categorized non-2xx server response.
    #[error("server request failed: {0}")]
    Transport(String),

    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("command not found")]
    CommandNotFound,

    #[error("invalid command usage")]
    InvalidCommandUsage,

    #[error("invalid input value")]
    InvalidInput,
}

impl KeeperError {
    /// Whether this error means "the record does not exist". Delete paths
    /// treat it as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KeeperError::NotFound)
    }
}
