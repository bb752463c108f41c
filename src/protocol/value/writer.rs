use crate::protocol::Value;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Encodes RESP values onto a buffered writer.
pub struct ValueWriter<W> {
    writer: BufWriter<W>,
}

impl<W> ValueWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: BufWriter<W>) -> Self {
        Self { writer }
    }

    pub async fn write(&mut self, value: &Value) -> io::Result<()> {
        self.write_unflushed(value).await?;
        self.writer.flush().await
    }

    /// Writes the RDB payload framed as `$<len>\r\n<bytes>` with no
    /// trailing CRLF, per the PSYNC handshake in §6.
    pub async fn write_rdb(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(b"$").await?;
        self.writer
            .write_all(bytes.len().to_string().as_bytes())
            .await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    async fn write_unflushed(&mut self, value: &Value) -> io::Result<()> {
        match value {
            Value::SimpleString(val) => self.write_simple_string(val).await,
            Value::SimpleError(val) => self.write_simple_error(val).await,
            Value::Integer(val) => self.write_integer(*val).await,
            Value::BulkString(bytes) => self.write_bulk_string(bytes).await,
            Value::Array(values) => self.write_array(values).await,
            Value::NullBulkString => self.writer.write_all(b"$-1\r\n").await,
            Value::NullArray => self.writer.write_all(b"*-1\r\n").await,
        }
    }

    async fn write_simple_string(&mut self, val: &str) -> io::Result<()> {
        self.writer.write_all(b"+").await?;
        self.writer.write_all(val.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await
    }

    async fn write_simple_error(&mut self, val: &str) -> io::Result<()> {
        self.writer.write_all(b"-").await?;
        self.writer.write_all(val.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await
    }

    async fn write_integer(&mut self, val: i64) -> io::Result<()> {
        let value = format!(":{}\r\n", val);
        self.writer.write_all(value.as_bytes()).await
    }

    async fn write_bulk_string(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(b"$").await?;
        self.writer
            .write_all(bytes.len().to_string().as_bytes())
            .await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.write_all(bytes).await?;
        self.writer.write_all(b"\r\n").await
    }

    async fn write_array(&mut self, values: &[Value]) -> io::Result<()> {
        self.writer.write_all(b"*").await?;
        self.writer
            .write_all(values.len().to_string().as_bytes())
            .await?;
        self.writer.write_all(b"\r\n").await?;

        for value in values {
            Box::pin(self.write_unflushed(value)).await?;
        }

        Ok(())
    }
}

/// Synchronously encodes a value into a byte vector. Used by tests to check
/// `Value::size` against the writer's actual output without spinning up a
/// tokio runtime per assertion.
#[cfg(test)]
pub fn encode_sync(value: &Value) -> Vec<u8> {
    use tokio::runtime::Builder;

    let runtime = Builder::new_current_thread().build().unwrap();
    runtime.block_on(async {
        let mut buffer = Vec::new();
        let mut writer = ValueWriter::new(BufWriter::new(&mut buffer));
        writer.write(value).await.unwrap();
        drop(writer);
        buffer
    })
}
