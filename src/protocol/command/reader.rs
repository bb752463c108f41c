use crate::protocol::{Command, RedisError, Value, ValueReadError, ValueReader};
use tokio::io::AsyncBufRead;

/// Decodes RESP frames and parses them into commands in one step.
pub struct CommandReader<R> {
    reader: ValueReader<R>,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandReadError {
    /// The client closed the connection (or never wrote anything). Not an
    /// error worth logging; the session just ends.
    #[error("connection closed")]
    EndOfStream,

    /// The byte stream couldn't be parsed as RESP. The session replies with
    /// an error and keeps reading rather than tearing the connection down.
    #[error("malformed RESP frame: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The frame decoded fine but isn't a command this server understands,
    /// or its arguments are invalid. The connection survives; the caller
    /// replies with the error and keeps reading.
    #[error(transparent)]
    Protocol(#[from] RedisError),
}

impl<R> CommandReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: ValueReader<R>) -> Self {
        Self { reader }
    }

    /// Bytes consumed from the underlying stream so far. Sessions snapshot
    /// this before each read to compute the offset a write command should
    /// be accounted at.
    pub fn offset(&self) -> u64 {
        self.reader.offset()
    }

    pub async fn read(&mut self) -> Result<Command, CommandReadError> {
        let value = match self.reader.read().await {
            Ok(value) => value,
            Err(ValueReadError::EndOfInput) => return Err(CommandReadError::EndOfStream),
            Err(ValueReadError::Invalid { message, .. }) => {
                return Err(CommandReadError::Malformed(message))
            }
            Err(ValueReadError::Io(err)) => return Err(CommandReadError::Io(err)),
        };

        Command::try_from(value).map_err(CommandReadError::Protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn read_command(input: &str) -> Result<Command, CommandReadError> {
        let value_reader = ValueReader::new(BufReader::new(input.as_bytes()));
        let mut reader = CommandReader::new(value_reader);
        reader.read().await
    }

    #[tokio::test]
    async fn reads_ping() {
        let command = read_command("*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(command, Command::Ping { message: None });
    }

    #[tokio::test]
    async fn surfaces_unknown_command_as_protocol_error() {
        match read_command("*1\r\n$4\r\nFROB\r\n").await {
            Err(CommandReadError::Protocol(RedisError::UnknownCommand(_))) => {}
            other => panic!("expected unknown-command protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn reports_end_of_stream() {
        match read_command("").await {
            Err(CommandReadError::EndOfStream) => {}
            other => panic!("expected end of stream, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn tracks_offset_across_reads() {
        let value_reader = ValueReader::new(BufReader::new(
            "*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n".as_bytes(),
        ));
        let mut reader = CommandReader::new(value_reader);

        let before = reader.offset();
        reader.read().await.unwrap();
        let after = reader.offset();
        assert!(after > before);
        assert_eq!(after, "*1\r\n$4\r\nPING\r\n".len() as u64);
    }
}
