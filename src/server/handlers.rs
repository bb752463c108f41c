use crate::protocol::{Command, RedisError, StreamId, Value, XReadId};
use crate::replication::ReplicaRegistry;
use crate::store::Store;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared, connection-independent state every handler can see: the
/// keyspace, the replica registry, this server's role and replication id.
/// Grounded on the `RedisServer`/`CommandHandler` split in the teacher's
/// `server/mod.rs` and `server/handler.rs`, generalized from a single
/// `Database` field to the full store + replication surface.
pub struct ServerContext {
    pub store: Arc<Store>,
    pub registry: Arc<ReplicaRegistry>,
    pub replid: String,
    pub is_replica: bool,
    pub master_offset: Arc<AtomicU64>,
}

/// What a handler wants the session to do with the reply.
pub enum HandlerReply {
    Value(Value),
    /// Used for propagated writes applied on a replica: the command still
    /// runs, but nothing is written back on this connection.
    NoReply,
}

impl From<Value> for HandlerReply {
    fn from(value: Value) -> Self {
        HandlerReply::Value(value)
    }
}

/// Dispatches every command except the ones the session handles directly
/// (`MULTI`/`EXEC`/`DISCARD`, which touch the per-session transaction
/// buffer, and `PSYNC`, which needs direct access to the connection's
/// write half).
pub async fn dispatch(
    ctx: &ServerContext,
    remote_addr: &str,
    replica_processed_offset: u64,
    command: Command,
) -> Result<HandlerReply, RedisError> {
    match command {
        Command::Ping { message } => Ok(ping(message)),
        Command::Echo { message } => Ok(Value::bulk_string(message).into()),
        Command::Get { key } => get(ctx, key).await,
        Command::Set { key, value, expiry } => set(ctx, key, value, expiry).await,
        Command::Incr { key } => incr(ctx, key).await,
        Command::Rpush { key, values } => push(ctx, key, values, false).await,
        Command::Lpush { key, values } => push(ctx, key, values, true).await,
        Command::Lrange { key, start, stop } => lrange(ctx, key, start, stop).await,
        Command::Llen { key } => llen(ctx, key).await,
        Command::Lpop { key, count } => lpop(ctx, key, count).await,
        Command::Blpop { key, timeout } => blpop(ctx, key, timeout).await,
        Command::Type { key } => Ok(Value::simple_string(ctx.store.type_of(&key).await).into()),
        Command::Xadd { key, id, fields } => xadd(ctx, key, id, fields).await,
        Command::Xrange { key, start, end } => xrange(ctx, key, start, end).await,
        Command::Xread { block, streams } => xread(ctx, block, streams).await,
        Command::Info { sections } => Ok(info(ctx, sections)),
        Command::Replconf { args } => {
            replconf(ctx, remote_addr, replica_processed_offset, args).await
        }
        Command::Wait {
            numreplicas,
            timeout_ms,
        } => wait(ctx, numreplicas, timeout_ms).await,
        Command::Multi | Command::Exec | Command::Discard | Command::Psync { .. } => {
            unreachable!("handled directly by the session")
        }
    }
}

fn ping(message: Option<Vec<u8>>) -> HandlerReply {
    match message {
        None => Value::simple_string("PONG").into(),
        Some(message) => Value::bulk_string(message).into(),
    }
}

async fn get(ctx: &ServerContext, key: Vec<u8>) -> Result<HandlerReply, RedisError> {
    match ctx.store.get(&key).await? {
        Some(value) => Ok(Value::bulk_string(value).into()),
        None => Ok(Value::NullBulkString.into()),
    }
}

async fn set(
    ctx: &ServerContext,
    key: Vec<u8>,
    value: Vec<u8>,
    expiry: Option<crate::protocol::Expiry>,
) -> Result<HandlerReply, RedisError> {
    let duration = expiry.map(|expiry| match expiry {
        crate::protocol::Expiry::Seconds(s) => std::time::Duration::from_secs(s),
        crate::protocol::Expiry::Millis(ms) => std::time::Duration::from_millis(ms),
    });
    ctx.store.set(key, value, duration).await;
    Ok(Value::ok().into())
}

async fn incr(ctx: &ServerContext, key: Vec<u8>) -> Result<HandlerReply, RedisError> {
    let value = ctx.store.incr(&key).await?;
    Ok(Value::integer(value).into())
}

async fn push(
    ctx: &ServerContext,
    key: Vec<u8>,
    values: Vec<Vec<u8>>,
    front: bool,
) -> Result<HandlerReply, RedisError> {
    let len = if front {
        ctx.store.lpush(&key, values).await?
    } else {
        ctx.store.rpush(&key, values).await?
    };
    Ok(Value::integer(len as i64).into())
}

async fn lrange(
    ctx: &ServerContext,
    key: Vec<u8>,
    start: i64,
    stop: i64,
) -> Result<HandlerReply, RedisError> {
    let values = ctx.store.lrange(&key, start, stop).await?;
    Ok(Value::Array(values.into_iter().map(Value::bulk_string).collect()).into())
}

async fn llen(ctx: &ServerContext, key: Vec<u8>) -> Result<HandlerReply, RedisError> {
    let len = ctx.store.llen(&key).await?;
    Ok(Value::integer(len as i64).into())
}

async fn lpop(
    ctx: &ServerContext,
    key: Vec<u8>,
    count: Option<i64>,
) -> Result<HandlerReply, RedisError> {
    let popped = ctx.store.lpop(&key, count).await?;
    let reply = match (popped, count) {
        (None, None) => Value::NullBulkString,
        (None, Some(_)) => Value::NullArray,
        (Some(values), None) => values
            .into_iter()
            .next()
            .map(Value::bulk_string)
            .unwrap_or(Value::NullBulkString),
        (Some(values), Some(_)) => {
            Value::Array(values.into_iter().map(Value::bulk_string).collect())
        }
    };
    Ok(reply.into())
}

async fn blpop(ctx: &ServerContext, key: Vec<u8>, timeout: f64) -> Result<HandlerReply, RedisError> {
    match ctx.store.blpop(&key, timeout).await? {
        Some(value) => Ok(Value::Array(vec![Value::bulk_string(key), Value::bulk_string(value)]).into()),
        None => Ok(Value::NullArray.into()),
    }
}

async fn xadd(
    ctx: &ServerContext,
    key: Vec<u8>,
    id: crate::protocol::StreamIdSpec,
    fields: Vec<(Vec<u8>, Vec<u8>)>,
) -> Result<HandlerReply, RedisError> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let assigned = ctx.store.xadd(&key, id, fields, now_ms).await?;
    Ok(Value::bulk_string(format_stream_id(assigned)).into())
}

async fn xrange(
    ctx: &ServerContext,
    key: Vec<u8>,
    start: StreamId,
    end: StreamId,
) -> Result<HandlerReply, RedisError> {
    let entries = ctx.store.xrange(&key, start, end).await?;
    Ok(encode_stream_entries(entries).into())
}

async fn xread(
    ctx: &ServerContext,
    block: Option<u64>,
    streams: Vec<(Vec<u8>, XReadId)>,
) -> Result<HandlerReply, RedisError> {
    let mut resolved = Vec::with_capacity(streams.len());
    for (key, id) in streams {
        let after = match id {
            XReadId::Explicit(id) => id,
            XReadId::Dollar => ctx.store.last_stream_id(&key).await,
        };
        resolved.push((key, after));
    }

    let results = match block {
        Some(ms) => ctx.store.xread_block(resolved, ms).await?,
        None => ctx.store.xread(&resolved).await?,
    };

    if results.is_empty() {
        return Ok(Value::NullArray.into());
    }

    let array = results
        .into_iter()
        .map(|(key, entries)| {
            Value::Array(vec![Value::bulk_string(key), encode_stream_entries(entries)])
        })
        .collect();

    Ok(Value::Array(array).into())
}

fn encode_stream_entries(entries: Vec<crate::store::StreamEntry>) -> Value {
    Value::Array(
        entries
            .into_iter()
            .map(|entry| {
                let fields = entry
                    .fields
                    .into_iter()
                    .flat_map(|(field, value)| {
                        [Value::bulk_string(field), Value::bulk_string(value)]
                    })
                    .collect();
                Value::Array(vec![
                    Value::bulk_string(format_stream_id(entry.id)),
                    Value::Array(fields),
                ])
            })
            .collect(),
    )
}

fn format_stream_id(id: StreamId) -> String {
    format!("{}-{}", id.0, id.1)
}

fn info(ctx: &ServerContext, sections: Vec<Vec<u8>>) -> HandlerReply {
    let _ = sections; // only a single "replication" section is supported
    let mut lines = Vec::new();

    if ctx.is_replica {
        lines.push("role:slave".to_string());
    } else {
        lines.push("role:master".to_string());
    }
    lines.push(format!("master_replid:{}", ctx.replid));
    lines.push(format!(
        "master_repl_offset:{}",
        ctx.master_offset.load(Ordering::SeqCst)
    ));

    Value::bulk_string(lines.join("\r\n")).into()
}

async fn replconf(
    ctx: &ServerContext,
    remote_addr: &str,
    replica_processed_offset: u64,
    args: Vec<Vec<u8>>,
) -> Result<HandlerReply, RedisError> {
    let subcommand = args
        .first()
        .map(|b| String::from_utf8_lossy(b).to_uppercase())
        .unwrap_or_default();

    match subcommand.as_str() {
        "LISTENING-PORT" => {
            let port: u16 = args
                .get(1)
                .and_then(|b| std::str::from_utf8(b).ok())
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| RedisError::invalid_argument("invalid listening-port"))?;
            ctx.registry.add_replica(remote_addr.to_string(), port)?;
            Ok(Value::ok().into())
        }
        "CAPA" => {
            let caps = args[1..]
                .iter()
                .map(|b| String::from_utf8_lossy(b).to_string())
                .collect();
            ctx.registry.add_capabilities(remote_addr, caps);
            Ok(Value::ok().into())
        }
        "GETACK" => Ok(Value::Array(vec![
            Value::bulk_string("REPLCONF"),
            Value::bulk_string("ACK"),
            Value::bulk_string(replica_processed_offset.to_string()),
        ])
        .into()),
        "ACK" => {
            let offset: u64 = args
                .get(1)
                .and_then(|b| std::str::from_utf8(b).ok())
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| RedisError::invalid_argument("invalid ACK offset"))?;
            ctx.registry.update_ack_offset(remote_addr, offset);
            Ok(HandlerReply::NoReply)
        }
        other => Err(RedisError::invalid_argument(format!(
            "unsupported REPLCONF subcommand '{}'",
            other
        ))),
    }
}

async fn wait(
    ctx: &ServerContext,
    numreplicas: i64,
    timeout_ms: i64,
) -> Result<HandlerReply, RedisError> {
    let total = ctx.registry.count() as i64;
    if total == 0 {
        return Ok(Value::integer(0).into());
    }

    let target_offset = ctx.master_offset.load(Ordering::SeqCst);
    if target_offset == 0 {
        return Ok(Value::integer(total).into());
    }

    ctx.registry.request_acks().await;

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms.max(0) as u64);
    loop {
        let acked = ctx.registry.count_acked_at_least(target_offset) as i64;
        if acked >= numreplicas || tokio::time::Instant::now() >= deadline {
            return Ok(Value::integer(acked).into());
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
