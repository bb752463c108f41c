use crate::protocol::{
    CommandReader, RedisError, Value, ValueReadError, ValueReader, ValueWriter,
};
use anyhow::Context;
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Dials `master_addr` and runs the replica-side handshake (PING →
/// REPLCONF listening-port → REPLCONF capa psync2 → PSYNC ? -1 → RDB
/// blob), per the wire sequence in `server/replication.rs` of the teacher,
/// extended with the RDB-consumption step taken from
/// `portugueseTorch-redis-rust/src/repl/replica.rs`.
///
/// Returns the same buffered reader and writer the handshake ran on, ready
/// to be handed straight to the session loop: any propagated command bytes
/// the master pipelined right after the RDB payload may already sit in the
/// reader's internal buffer, so building a fresh reader on the stream
/// instead would silently drop them. The byte counter is rebased to zero
/// right after the RDB is consumed, since the replication offset counts
/// from there, not from the handshake exchange that preceded it.
pub async fn connect(
    master_addr: &str,
    listening_port: u16,
) -> Result<(CommandReader<BufReader<OwnedReadHalf>>, ValueWriter<OwnedWriteHalf>), RedisError> {
    let stream = TcpStream::connect(master_addr)
        .await
        .context(format!("failed to connect to master at {}", master_addr))?;

    let (read_half, write_half) = stream.into_split();
    let mut reader = ValueReader::new(BufReader::new(read_half));
    let mut writer = ValueWriter::new(BufWriter::new(write_half));

    send_expect_non_error(&mut writer, &mut reader, Value::command_str("PING", &[])).await?;
    send_expect_non_error(
        &mut writer,
        &mut reader,
        Value::command_str("REPLCONF", &["listening-port", &listening_port.to_string()]),
    )
    .await?;
    send_expect_non_error(
        &mut writer,
        &mut reader,
        Value::command_str("REPLCONF", &["capa", "psync2"]),
    )
    .await?;

    writer
        .write(&Value::command_str("PSYNC", &["?", "-1"]))
        .await
        .map_err(RedisError::Io)?;

    match reader.read().await.map_err(map_read_error)? {
        Value::SimpleString(s) if s.starts_with("FULLRESYNC") => {
            tracing::info!(reply = %s, "master accepted PSYNC");
        }
        other => {
            tracing::warn!(?other, "unexpected PSYNC reply");
            return Err(RedisError::ReplicationHandshake);
        }
    }

    let rdb_len = reader.read_bulk_header().await.map_err(map_read_error)?;
    if rdb_len < 0 {
        return Err(RedisError::ReplicationHandshake);
    }
    reader
        .read_raw(rdb_len as usize)
        .await
        .map_err(map_read_error)?;
    tracing::info!(bytes = rdb_len, "received RDB payload from master");

    reader.reset_offset();
    Ok((CommandReader::new(reader), writer))
}

async fn send_expect_non_error<W>(
    writer: &mut ValueWriter<W>,
    reader: &mut ValueReader<impl tokio::io::AsyncBufRead + Unpin>,
    command: Value,
) -> Result<(), RedisError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer.write(&command).await.map_err(RedisError::Io)?;
    match reader.read().await.map_err(map_read_error)? {
        Value::SimpleError(message) => {
            tracing::warn!(%message, ?command, "master rejected handshake step");
            Err(RedisError::ReplicationHandshake)
        }
        _ => Ok(()),
    }
}

fn map_read_error(error: ValueReadError) -> RedisError {
    match error {
        ValueReadError::Io(err) => RedisError::Io(err),
        _ => RedisError::ReplicationHandshake,
    }
}
