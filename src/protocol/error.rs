use crate::protocol::Value;

/// Every error this system can surface, either over the wire as a RESP error
/// reply or as a reason for tearing down a connection.
#[derive(Debug, thiserror::Error)]
pub enum RedisError {
    #[error("ERR protocol error: {0}")]
    Protocol(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR {0}")]
    InvalidArgument(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    StreamIdZero,

    #[error("ERR The stream has exhausted the last possible sequence number")]
    SeqOverflow,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    #[error("ERR replica handshake failed")]
    ReplicationHandshake,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl RedisError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn wrong_arity(command: &str) -> Self {
        Self::WrongArity(command.to_string())
    }

    /// Converts the error into the RESP error reply a client would see.
    ///
    /// `Io`/`Unexpected` never reach this: the session terminates the
    /// connection instead of replying when those variants occur.
    pub fn to_resp(&self) -> Value {
        Value::simple_error(&self.to_string())
    }
}
