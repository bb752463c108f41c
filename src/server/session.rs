use crate::protocol::{
    Command, CommandReadError, CommandReader, RedisError, Value, ValueReader, ValueWriter,
};
use crate::replication::EMPTY_RDB;
use crate::server::handlers::{self, HandlerReply, ServerContext};
use crate::transactions::Transaction;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Runs one inbound connection to completion: decode, dispatch, reply, in a
/// loop, with the replication-session bookkeeping from SPEC_FULL §4.G.
/// Grounded on the teacher's `server/handler.rs` `CommandHandler` +
/// `server/listener.rs` per-connection task, merged into a single loop since
/// the session here owns both socket halves directly (no writer task).
pub struct Session {
    reader: CommandReader<BufReader<OwnedReadHalf>>,
    writer: Option<ValueWriter<OwnedWriteHalf>>,
    remote_addr: String,
    transaction: Transaction,
    /// True once this connection carries replicated traffic: either it's
    /// the outbound link to our master, or a client that issued PSYNC and
    /// was handed off to the replica registry.
    is_replication_session: bool,
}

impl Session {
    pub fn new(stream: TcpStream, remote_addr: String, is_replication_session: bool) -> Self {
        let (read_half, write_half) = stream.into_split();
        let reader = CommandReader::new(ValueReader::new(BufReader::new(read_half)));
        let writer = ValueWriter::new(BufWriter::new(write_half));
        Self::from_parts(reader, writer, remote_addr, is_replication_session)
    }

    /// Builds a session on top of a reader/writer pair that already did
    /// some protocol exchange of its own (the replica handshake's PSYNC +
    /// RDB consumption). Keeping the same buffered reader, rather than
    /// wrapping the raw stream again, matters: any bytes the peer already
    /// pipelined past that exchange would otherwise sit trapped in the old
    /// reader's internal buffer and be lost.
    pub fn from_parts(
        reader: CommandReader<BufReader<OwnedReadHalf>>,
        writer: ValueWriter<OwnedWriteHalf>,
        remote_addr: String,
        is_replication_session: bool,
    ) -> Self {
        Self {
            reader,
            writer: Some(writer),
            remote_addr,
            transaction: Transaction::new(),
            is_replication_session,
        }
    }

    pub async fn run(mut self, ctx: Arc<ServerContext>) {
        loop {
            let offset_before = self.reader.offset();

            let command = match self.reader.read().await {
                Ok(command) => command,
                Err(CommandReadError::EndOfStream) => {
                    tracing::debug!(addr = %self.remote_addr, "connection closed");
                    break;
                }
                Err(CommandReadError::Io(error)) => {
                    tracing::warn!(addr = %self.remote_addr, %error, "connection error");
                    break;
                }
                Err(CommandReadError::Malformed(message)) => {
                    if self.reply(Value::simple_error(format!("ERR protocol error: {}", message))).await.is_err() {
                        break;
                    }
                    continue;
                }
                Err(CommandReadError::Protocol(error)) => {
                    if self.reply(error.to_resp()).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let replica_processed_offset = if self.is_replication_session {
                offset_before
            } else {
                0
            };

            if self
                .handle_command(&ctx, command, replica_processed_offset)
                .await
                .is_err()
            {
                tracing::warn!(addr = %self.remote_addr, "write failed, closing connection");
                break;
            }
        }
    }

    async fn handle_command(
        &mut self,
        ctx: &ServerContext,
        command: Command,
        replica_processed_offset: u64,
    ) -> std::io::Result<()> {
        let command = match command {
            Command::Multi => {
                let reply = match self.transaction.begin() {
                    Ok(()) => Value::ok(),
                    Err(error) => error.to_resp(),
                };
                return self.reply(reply).await;
            }
            Command::Discard => {
                let reply = match self.transaction.discard() {
                    Ok(()) => Value::ok(),
                    Err(error) => error.to_resp(),
                };
                return self.reply(reply).await;
            }
            Command::Exec => return self.handle_exec(ctx).await,
            Command::Psync { .. } => return self.handle_psync(ctx).await,
            queued if self.transaction.is_active() => {
                let reply = match self.transaction.queue(queued) {
                    Ok(()) => Value::simple_string("QUEUED"),
                    Err(error) => error.to_resp(),
                };
                return self.reply(reply).await;
            }
            other => other,
        };

        self.dispatch_and_reply(ctx, command, replica_processed_offset)
            .await
    }

    async fn dispatch_and_reply(
        &mut self,
        ctx: &ServerContext,
        command: Command,
        replica_processed_offset: u64,
    ) -> std::io::Result<()> {
        let is_replconf = matches!(&command, Command::Replconf { .. });
        let result = handlers::dispatch(ctx, &self.remote_addr, replica_processed_offset, command.clone()).await;

        match result {
            Ok(HandlerReply::Value(value)) => {
                if !ctx.is_replica {
                    if let Some(propagated) = propagation_value(&command, &value) {
                        ctx.registry.broadcast(&propagated).await;
                        ctx.master_offset
                            .fetch_add(propagated.size() as u64, Ordering::SeqCst);
                    }
                } else if self.is_replication_session {
                    ctx.master_offset.store(self.reader.offset(), Ordering::SeqCst);
                }

                if self.is_replication_session && !is_replconf {
                    Ok(())
                } else {
                    self.reply(value).await
                }
            }
            Ok(HandlerReply::NoReply) => {
                if ctx.is_replica && self.is_replication_session {
                    ctx.master_offset.store(self.reader.offset(), Ordering::SeqCst);
                }
                Ok(())
            }
            Err(error) => {
                if self.is_replication_session {
                    tracing::warn!(addr = %self.remote_addr, %error, "propagated command failed, dropping");
                    Ok(())
                } else {
                    self.reply(error.to_resp()).await
                }
            }
        }
    }

    async fn handle_exec(&mut self, ctx: &ServerContext) -> std::io::Result<()> {
        let queued = match self.transaction.take_for_exec() {
            Ok(commands) => commands,
            Err(error) => return self.reply(error.to_resp()).await,
        };

        let mut replies = Vec::with_capacity(queued.len());
        for command in queued {
            let result = handlers::dispatch(ctx, &self.remote_addr, 0, command.clone()).await;
            match result {
                Ok(HandlerReply::Value(value)) => {
                    if !ctx.is_replica {
                        if let Some(propagated) = propagation_value(&command, &value) {
                            ctx.registry.broadcast(&propagated).await;
                            ctx.master_offset
                                .fetch_add(propagated.size() as u64, Ordering::SeqCst);
                        }
                    }
                    replies.push(value);
                }
                Ok(HandlerReply::NoReply) => {}
                Err(error) => replies.push(error.to_resp()),
            }
        }

        self.reply(Value::Array(replies)).await
    }

    async fn handle_psync(&mut self, ctx: &ServerContext) -> std::io::Result<()> {
        if ctx.is_replica || ctx.registry.listening_port(&self.remote_addr).is_none() {
            return self.reply(RedisError::ReplicationHandshake.to_resp()).await;
        }

        let offset = ctx.master_offset.load(Ordering::SeqCst);
        self.reply(Value::simple_string(format!("FULLRESYNC {} {}", ctx.replid, offset)))
            .await?;

        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writer.write_rdb(EMPTY_RDB).await?;

        if let Some(writer) = self.writer.take() {
            ctx.registry
                .add_connection(&self.remote_addr, Arc::new(Mutex::new(writer)));
        }
        self.is_replication_session = true;
        tracing::info!(addr = %self.remote_addr, "replica attached");
        Ok(())
    }

    async fn reply(&mut self, value: Value) -> std::io::Result<()> {
        match &mut self.writer {
            Some(writer) => writer.write(&value).await,
            None => Ok(()),
        }
    }
}

/// Whether `command`, having just been handled with `reply`, should be
/// broadcast to replicas, and if so what to broadcast. See SPEC_FULL
/// §4.G's write-command classification: everything `Command::is_write`
/// already covers, plus BLPOP only when it actually popped an element.
fn propagation_value(command: &Command, reply: &Value) -> Option<Value> {
    match command {
        // A blocking pop is broadcast as a plain LPOP, not replayed with its
        // original (possibly forever) timeout: the BLPOP broadcast and the
        // RPUSH/LPUSH that satisfied it come from two independent sessions
        // with no ordering guarantee between them, so a replica applying a
        // verbatim BLPOP could see an empty list first and block its
        // replication-apply loop waiting for a push that already happened.
        Command::Blpop { key, .. } => match reply {
            Value::Array(_) => Some(Value::command("LPOP", &[key])),
            _ => None,
        },
        // The `*`/`ms-*` id forms are resolved against this node's clock and
        // the stream's current last id; replaying them verbatim on a
        // replica could assign a different id there. Rewrite to the id the
        // store actually assigned before broadcasting, same as the
        // handler's own reply.
        Command::Xadd { key, fields, .. } => match reply {
            Value::BulkString(assigned_id) => {
                let mut args: Vec<&[u8]> = Vec::with_capacity(2 + fields.len() * 2);
                args.push(key);
                args.push(assigned_id);
                for (field, value) in fields {
                    args.push(field);
                    args.push(value);
                }
                Some(Value::command("XADD", &args))
            }
            _ => None,
        },
        _ if command.is_write() => Some(command.to_value()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::ReplicaRegistry;
    use crate::store::Store;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicU64;
    use tokio::net::TcpListener;

    async fn spawn_test_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = Arc::new(ServerContext {
            store: Arc::new(Store::new()),
            registry: Arc::new(ReplicaRegistry::new()),
            replid: "0".repeat(40),
            is_replica: false,
            master_offset: Arc::new(AtomicU64::new(0)),
        });

        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            Session::new(stream, peer.to_string(), false).run(ctx).await;
        });

        addr
    }

    async fn client(
        addr: SocketAddr,
    ) -> (
        ValueReader<BufReader<OwnedReadHalf>>,
        ValueWriter<OwnedWriteHalf>,
    ) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        (
            ValueReader::new(BufReader::new(read_half)),
            ValueWriter::new(BufWriter::new(write_half)),
        )
    }

    #[tokio::test]
    async fn ping_round_trip_over_the_wire() {
        let addr = spawn_test_server().await;
        let (mut reader, mut writer) = client(addr).await;

        writer.write(&Value::command_str("PING", &[])).await.unwrap();
        assert_eq!(reader.read().await.unwrap(), Value::simple_string("PONG"));
    }

    #[tokio::test]
    async fn multi_exec_queues_and_runs_in_order() {
        let addr = spawn_test_server().await;
        let (mut reader, mut writer) = client(addr).await;

        writer.write(&Value::command_str("MULTI", &[])).await.unwrap();
        assert_eq!(reader.read().await.unwrap(), Value::ok());

        writer
            .write(&Value::command_str("SET", &["a", "1"]))
            .await
            .unwrap();
        assert_eq!(reader.read().await.unwrap(), Value::simple_string("QUEUED"));

        writer.write(&Value::command_str("GET", &["a"])).await.unwrap();
        assert_eq!(reader.read().await.unwrap(), Value::simple_string("QUEUED"));

        writer.write(&Value::command_str("EXEC", &[])).await.unwrap();
        match reader.read().await.unwrap() {
            Value::Array(values) => {
                assert_eq!(values[0], Value::ok());
                assert_eq!(values[1], Value::bulk_string(b"1".to_vec()));
            }
            other => panic!("expected array reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn exec_without_multi_is_an_error() {
        let addr = spawn_test_server().await;
        let (mut reader, mut writer) = client(addr).await;

        writer.write(&Value::command_str("EXEC", &[])).await.unwrap();
        match reader.read().await.unwrap() {
            Value::SimpleError(message) => assert!(message.contains("EXEC without MULTI")),
            other => panic!("expected error reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_frame_gets_error_reply_and_connection_continues() {
        let addr = spawn_test_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let mut reader = ValueReader::new(BufReader::new(read_half));
        let mut raw_writer = BufWriter::new(write_half);

        use tokio::io::AsyncWriteExt;
        raw_writer.write_all(b"!not-resp\r\n").await.unwrap();
        raw_writer.flush().await.unwrap();

        match reader.read().await.unwrap() {
            Value::SimpleError(message) => assert!(message.contains("protocol error")),
            other => panic!("expected protocol error, got {:?}", other),
        }

        raw_writer
            .write_all(b"*1\r\n$4\r\nPING\r\n")
            .await
            .unwrap();
        raw_writer.flush().await.unwrap();
        assert_eq!(reader.read().await.unwrap(), Value::simple_string("PONG"));
    }
}
