use crate::protocol::Value;
use std::{io, str::FromStr};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// A possible error reading a RESP value.
#[derive(Debug, thiserror::Error)]
pub enum ValueReadError {
    /// EOF reached when _starting_ to read a RESP value.
    #[error("EOF reached; no value to read")]
    EndOfInput,

    /// The read data can't be correctly interpreted as a RESP value.
    #[error("{message}")]
    Invalid { message: String, data: Vec<u8> },

    /// An unexpected I/O error occurred while reading data.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Decodes RESP values off a buffered reader, tracking exactly how many
/// bytes of the underlying stream have been consumed. Sessions snapshot
/// this counter before each `read()` to assign the byte offset at which
/// the about-to-arrive command begins (used for replication accounting).
pub struct ValueReader<R> {
    reader: R,
    offset: u64,
}

impl<R> ValueReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Bytes consumed from the underlying stream so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Rebases the byte counter to zero without touching any buffered,
    /// already-consumed bytes. Used once the replica handshake completes:
    /// the replication offset counts bytes from right after the RDB
    /// payload, not the handshake exchange that preceded it.
    pub fn reset_offset(&mut self) {
        self.offset = 0;
    }

    pub async fn read(&mut self) -> Result<Value, ValueReadError> {
        let prefix = match self.reader.read_u8().await {
            Ok(byte) => {
                self.offset += 1;
                char::from(byte)
            }
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ValueReadError::EndOfInput)
            }
            Err(error) => return Err(ValueReadError::Io(error)),
        };

        match prefix {
            '+' => self.read_simple_string().await,
            '-' => self.read_simple_error().await,
            ':' => self.read_integer().await,
            '$' => self.read_bulk_string().await,
            '*' => self.read_array().await,
            _ => Err(ValueReadError::Invalid {
                message: format!("invalid RESP value prefix: {:?}", prefix),
                data: {
                    let mut buffer = [0; 4];
                    prefix.encode_utf8(&mut buffer).as_bytes().to_vec()
                },
            }),
        }
    }

    /// Reads exactly `len` raw bytes with no trailing CRLF (see §6 of the
    /// spec: `$<len>\r\n<bytes>` with no terminator). Used only for the
    /// one-shot RDB blob during handshake.
    pub async fn read_raw(&mut self, len: usize) -> Result<Vec<u8>, ValueReadError> {
        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data).await?;
        self.offset += len as u64;
        Ok(data)
    }

    /// Reads the `$<len>\r\n` prefix used ahead of the RDB payload.
    pub async fn read_bulk_header(&mut self) -> Result<i64, ValueReadError> {
        let prefix = self.reader.read_u8().await?;
        self.offset += 1;
        if prefix != b'$' {
            return Err(ValueReadError::Invalid {
                message: format!("expected '$' before RDB payload, got {:?}", prefix as char),
                data: vec![prefix],
            });
        }
        self.read_length().await
    }

    async fn read_simple_string(&mut self) -> Result<Value, ValueReadError> {
        let value = self.read_line().await?;
        Ok(Value::SimpleString(value))
    }

    async fn read_simple_error(&mut self) -> Result<Value, ValueReadError> {
        let value = self.read_line().await?;
        Ok(Value::SimpleError(value))
    }

    async fn read_integer(&mut self) -> Result<Value, ValueReadError> {
        let value = self.parse_line::<i64>("invalid integer value").await?;
        Ok(Value::Integer(value))
    }

    async fn read_bulk_string(&mut self) -> Result<Value, ValueReadError> {
        let length = self.read_length().await?;
        if length < 0 {
            return Ok(Value::NullBulkString);
        }

        let mut data = vec![0u8; length as usize + 2];
        self.reader.read_exact(&mut data).await?;
        self.offset += data.len() as u64;

        if data[data.len() - 2..] != [0xd, 0xa] {
            return Err(ValueReadError::Invalid {
                message: "bulk string not terminated by \\r\\n".to_string(),
                data,
            });
        }

        data.truncate(data.len() - 2);
        Ok(Value::BulkString(data))
    }

    async fn read_array(&mut self) -> Result<Value, ValueReadError> {
        let length = self.read_length().await?;
        if length < 0 {
            return Ok(Value::NullArray);
        }

        let mut values = Vec::with_capacity(length as usize);
        for _ in 0..length {
            // Pin adds the indirection needed for a recursive async call.
            let value = Box::pin(self.read()).await?;
            values.push(value);
        }

        Ok(Value::Array(values))
    }

    async fn read_line_bytes(&mut self) -> Result<Vec<u8>, ValueReadError> {
        let mut line = Vec::new();
        let mut cr_found = false;

        loop {
            let bytes = self.reader.fill_buf().await?.to_vec();
            let bytes_read = bytes.len();

            if bytes_read == 0 {
                return Err(ValueReadError::Io(io::ErrorKind::UnexpectedEof.into()));
            }

            // Edge case: CR and LF split across two reads.
            if cr_found && bytes[0] == 0xa {
                line.pop();
                self.reader.consume(1);
                self.offset += 1;
                return Ok(line);
            }

            for i in 0..bytes_read {
                if bytes[i] != 0xa {
                    continue;
                }

                if i > 0 && bytes[i - 1] == 0xd {
                    line.extend(&bytes[0..i - 1]);
                    self.reader.consume(i + 1);
                    self.offset += (i + 1) as u64;
                    return Ok(line);
                }

                // A bare LF with no preceding CR is not a valid RESP line
                // terminator; it's a protocol error, not a reason to keep
                // reading until EOF.
                line.extend(&bytes[0..i]);
                self.reader.consume(i + 1);
                self.offset += (i + 1) as u64;
                return Err(ValueReadError::Invalid {
                    message: "line terminated by bare LF, expected CRLF".to_string(),
                    data: line,
                });
            }

            cr_found = bytes[bytes_read - 1] == 0xd;

            self.reader.consume(bytes_read);
            self.offset += bytes_read as u64;
            line.extend(bytes);
        }
    }

    async fn read_line(&mut self) -> Result<String, ValueReadError> {
        let bytes = self.read_line_bytes().await?;
        String::from_utf8(bytes).map_err(|error| ValueReadError::Invalid {
            message: format!("invalid UTF-8 in line: {}", error),
            data: error.into_bytes(),
        })
    }

    async fn parse_line<T>(&mut self, message: &str) -> Result<T, ValueReadError>
    where
        T: FromStr,
    {
        let value = self.read_line().await?;
        value.parse().map_err(|_| ValueReadError::Invalid {
            message: format!("{}: {}", message, value),
            data: value.into_bytes(),
        })
    }

    async fn read_length(&mut self) -> Result<i64, ValueReadError> {
        self.parse_line("invalid length").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn read_value(buffer: &str) -> Result<Value, ValueReadError> {
        let reader = BufReader::new(buffer.as_bytes());
        let mut parser = ValueReader::new(reader);
        parser.read().await
    }

    #[tokio::test]
    async fn read_simple_string() {
        match read_value("+OK\r\n").await {
            Ok(Value::SimpleString(val)) => assert_eq!(val, "OK"),
            val => panic!("expected simple string, got {:?}", val),
        }
    }

    #[tokio::test]
    async fn read_simple_error() {
        match read_value("-ERR message\r\n").await {
            Ok(Value::SimpleError(val)) => assert_eq!(val, "ERR message"),
            val => panic!("expected simple error, got {:?}", val),
        }
    }

    #[tokio::test]
    async fn read_integer_extremes_round_trip() {
        for value in [0i64, i64::MIN, i64::MAX] {
            let wire = format!(":{}\r\n", value);
            match read_value(&wire).await {
                Ok(Value::Integer(v)) => assert_eq!(v, value),
                val => panic!("expected Integer({}), got {:?}", value, val),
            }
        }
    }

    #[tokio::test]
    async fn read_integer_invalid() {
        match read_value(":x\r\n").await {
            Err(ValueReadError::Invalid { .. }) => {}
            val => panic!("expected protocol error, got {:?}", val),
        }
    }

    #[tokio::test]
    async fn read_bulk_string_valid() {
        match read_value("$2\r\nOK\r\n").await {
            Ok(Value::BulkString(val)) => assert_eq!(val, "OK".as_bytes()),
            val => panic!("expected BulkString(OK), got {:?}", val),
        }
    }

    #[tokio::test]
    async fn read_empty_bulk_string_is_not_null() {
        match read_value("$0\r\n\r\n").await {
            Ok(Value::BulkString(val)) => assert!(val.is_empty()),
            val => panic!("expected empty BulkString, got {:?}", val),
        }
    }

    #[tokio::test]
    async fn read_bulk_string_bad_terminator() {
        match read_value("$2\r\nOKxx").await {
            Err(ValueReadError::Invalid { .. }) => {}
            val => panic!("expected protocol error, got {:?}", val),
        }
    }

    #[tokio::test]
    async fn read_array_valid() {
        match read_value("*1\r\n$2\r\nOK\r\n").await {
            Ok(Value::Array(values)) => match values.as_slice() {
                [Value::BulkString(bytes)] => assert_eq!(bytes, "OK".as_bytes()),
                val => panic!("expected OK, got {:?}", val),
            },
            val => panic!("expected array, got {:?}", val),
        }
    }

    #[tokio::test]
    async fn read_empty_array_is_not_null() {
        match read_value("*0\r\n").await {
            Ok(Value::Array(values)) => assert!(values.is_empty()),
            val => panic!("expected empty array, got {:?}", val),
        }
    }

    #[tokio::test]
    async fn read_null_bulk_string() {
        match read_value("$-1\r\n").await {
            Ok(Value::NullBulkString) => {}
            val => panic!("expected NullBulkString, got {:?}", val),
        }
    }

    #[tokio::test]
    async fn read_null_array() {
        match read_value("*-1\r\n").await {
            Ok(Value::NullArray) => {}
            val => panic!("expected null array, got {:?}", val),
        }
    }

    #[tokio::test]
    async fn read_empty_stream_is_end_of_input() {
        match read_value("").await {
            Err(ValueReadError::EndOfInput) => {}
            val => panic!("expected end of input, got {:?}", val),
        }
    }

    #[tokio::test]
    async fn offset_tracks_consumed_bytes() {
        let reader = BufReader::new("*1\r\n$4\r\nPING\r\n+OK\r\n".as_bytes());
        let mut parser = ValueReader::new(reader);

        parser.read().await.unwrap();
        assert_eq!(parser.offset(), "*1\r\n$4\r\nPING\r\n".len() as u64);

        parser.read().await.unwrap();
        assert_eq!(parser.offset(), "*1\r\n$4\r\nPING\r\n+OK\r\n".len() as u64);
    }

    #[tokio::test]
    async fn bare_lf_is_invalid_not_eof() {
        match read_value("+OK\n").await {
            Err(ValueReadError::Invalid { .. }) => {}
            val => panic!("expected protocol error, got {:?}", val),
        }
    }

    #[tokio::test]
    async fn crlf_split_across_reads() {
        let reader = AsyncReadExt::chain("+OK\r".as_bytes(), "\n".as_bytes());
        let reader = BufReader::new(reader);
        let mut parser = ValueReader::new(reader);

        match parser.read().await {
            Ok(Value::SimpleString(val)) => assert_eq!(val, "OK"),
            val => panic!("expected simple string, got {:?}", val),
        }
    }
}
