use super::{Command, Expiry, StreamId, StreamIdSpec, XReadId, STREAM_ID_MAX};
use crate::protocol::{RedisError, Value};
use std::collections::VecDeque;

pub fn from_value(value: Value) -> Result<Command, RedisError> {
    match value {
        Value::Array(values) => from_values(values),
        Value::NullArray => Err(RedisError::Protocol(
            "expected a command array, got a null array".to_string(),
        )),
        _ => Err(RedisError::Protocol(
            "expected a command array".to_string(),
        )),
    }
}

fn from_values(values: Vec<Value>) -> Result<Command, RedisError> {
    if values.is_empty() {
        return Err(RedisError::Protocol(
            "command array must not be empty".to_string(),
        ));
    }

    let mut parts = VecDeque::with_capacity(values.len());
    for (idx, value) in values.into_iter().enumerate() {
        match value {
            Value::BulkString(bytes) => parts.push_back(bytes),
            Value::SimpleString(s) => parts.push_back(s.into_bytes()),
            _ => {
                return Err(RedisError::Protocol(format!(
                    "command array element at index {} must be a string",
                    idx
                )))
            }
        }
    }

    from_parts(parts)
}

fn from_parts(mut values: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    let name = values.pop_front().unwrap();
    let name = to_utf8(name)?.to_uppercase();

    match name.as_str() {
        "PING" => parse_ping(values),
        "ECHO" => parse_echo(values),
        "GET" => parse_get(values),
        "SET" => parse_set(values),
        "INCR" => parse_incr(values),
        "RPUSH" => parse_push(values, "RPUSH", |key, values| Command::Rpush { key, values }),
        "LPUSH" => parse_push(values, "LPUSH", |key, values| Command::Lpush { key, values }),
        "LRANGE" => parse_lrange(values),
        "LLEN" => parse_llen(values),
        "LPOP" => parse_lpop(values),
        "BLPOP" => parse_blpop(values),
        "TYPE" => parse_type(values),
        "XADD" => parse_xadd(values),
        "XRANGE" => parse_xrange(values),
        "XREAD" => parse_xread(values),
        "MULTI" => parse_no_args(values, "MULTI", Command::Multi),
        "EXEC" => parse_no_args(values, "EXEC", Command::Exec),
        "DISCARD" => parse_no_args(values, "DISCARD", Command::Discard),
        "INFO" => Ok(Command::Info {
            sections: values.into(),
        }),
        "REPLCONF" => Ok(Command::Replconf {
            args: values.into(),
        }),
        "PSYNC" => parse_psync(values),
        "WAIT" => parse_wait(values),
        other => Err(RedisError::UnknownCommand(other.to_string())),
    }
}

fn parse_ping(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.len() > 1 {
        return Err(RedisError::wrong_arity("PING"));
    }
    Ok(Command::Ping {
        message: args.pop_front(),
    })
}

fn parse_echo(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.len() != 1 {
        return Err(RedisError::wrong_arity("ECHO"));
    }
    Ok(Command::Echo {
        message: args.pop_front().unwrap(),
    })
}

fn parse_get(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    let key = args.pop_front().ok_or_else(|| RedisError::wrong_arity("GET"))?;
    if !args.is_empty() {
        return Err(RedisError::wrong_arity("GET"));
    }
    Ok(Command::Get { key })
}

fn parse_incr(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    let key = args.pop_front().ok_or_else(|| RedisError::wrong_arity("INCR"))?;
    if !args.is_empty() {
        return Err(RedisError::wrong_arity("INCR"));
    }
    Ok(Command::Incr { key })
}

fn parse_set(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.len() < 2 {
        return Err(RedisError::wrong_arity("SET"));
    }

    let key = args.pop_front().unwrap();
    let value = args.pop_front().unwrap();
    let expiry = parse_set_expiry(args)?;

    Ok(Command::Set { key, value, expiry })
}

fn parse_set_expiry(mut args: VecDeque<Vec<u8>>) -> Result<Option<Expiry>, RedisError> {
    let kind = match args.pop_front() {
        Some(arg) => to_utf8(arg)?.to_uppercase(),
        None => return Ok(None),
    };

    let amount = args
        .pop_front()
        .ok_or_else(|| RedisError::wrong_arity("SET"))?;
    let amount = parse_int::<u64>(&amount)?;

    if amount == 0 {
        return Err(RedisError::invalid_argument(
            "invalid expire time in 'set' command",
        ));
    }

    if !args.is_empty() {
        return Err(RedisError::wrong_arity("SET"));
    }

    match kind.as_str() {
        "EX" => Ok(Some(Expiry::Seconds(amount))),
        "PX" => Ok(Some(Expiry::Millis(amount))),
        other => Err(RedisError::invalid_argument(format!(
            "unsupported option '{}'",
            other
        ))),
    }
}

fn parse_push(
    mut args: VecDeque<Vec<u8>>,
    name: &str,
    build: impl FnOnce(Vec<u8>, Vec<Vec<u8>>) -> Command,
) -> Result<Command, RedisError> {
    if args.len() < 2 {
        return Err(RedisError::wrong_arity(name));
    }
    let key = args.pop_front().unwrap();
    Ok(build(key, args.into()))
}

fn parse_lrange(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.len() != 3 {
        return Err(RedisError::wrong_arity("LRANGE"));
    }
    let key = args.pop_front().unwrap();
    let start = parse_int::<i64>(&args.pop_front().unwrap())?;
    let stop = parse_int::<i64>(&args.pop_front().unwrap())?;
    Ok(Command::Lrange { key, start, stop })
}

fn parse_llen(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.len() != 1 {
        return Err(RedisError::wrong_arity("LLEN"));
    }
    Ok(Command::Llen {
        key: args.pop_front().unwrap(),
    })
}

fn parse_lpop(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.is_empty() || args.len() > 2 {
        return Err(RedisError::wrong_arity("LPOP"));
    }
    let key = args.pop_front().unwrap();
    let count = match args.pop_front() {
        Some(raw) => Some(parse_int::<i64>(&raw)?),
        None => None,
    };
    Ok(Command::Lpop { key, count })
}

fn parse_blpop(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.len() != 2 {
        return Err(RedisError::wrong_arity("BLPOP"));
    }
    let key = args.pop_front().unwrap();
    let timeout = parse_float(&args.pop_front().unwrap())?;
    if timeout < 0.0 {
        return Err(RedisError::invalid_argument("timeout is negative"));
    }
    Ok(Command::Blpop { key, timeout })
}

fn parse_type(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.len() != 1 {
        return Err(RedisError::wrong_arity("TYPE"));
    }
    Ok(Command::Type {
        key: args.pop_front().unwrap(),
    })
}

fn parse_xadd(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.len() < 3 {
        return Err(RedisError::wrong_arity("XADD"));
    }
    let key = args.pop_front().unwrap();
    let id = parse_stream_id_spec(&args.pop_front().unwrap())?;

    if args.len() % 2 != 0 || args.is_empty() {
        return Err(RedisError::wrong_arity("XADD"));
    }

    let mut fields = Vec::with_capacity(args.len() / 2);
    while let Some(field) = args.pop_front() {
        let value = args.pop_front().unwrap();
        fields.push((field, value));
    }

    Ok(Command::Xadd { key, id, fields })
}

fn parse_stream_id_spec(raw: &[u8]) -> Result<StreamIdSpec, RedisError> {
    if raw == b"*" {
        return Ok(StreamIdSpec::Auto);
    }

    let text = to_utf8(raw.to_vec())?;
    match text.split_once('-') {
        Some((ms, "*")) => Ok(StreamIdSpec::Partial(parse_int_str::<u64>(ms)?)),
        Some((ms, seq)) => Ok(StreamIdSpec::Explicit((
            parse_int_str::<u64>(ms)?,
            parse_int_str::<u64>(seq)?,
        ))),
        None => Ok(StreamIdSpec::Explicit((parse_int_str::<u64>(&text)?, 0))),
    }
}

/// Parses an XRANGE bound: `-`/`+` sentinels, a bare ms (defaulted per
/// `low`), or a full `ms-seq` pair.
fn parse_xrange_bound(raw: &[u8], low: bool) -> Result<StreamId, RedisError> {
    if raw == b"-" {
        return Ok((0, 0));
    }
    if raw == b"+" {
        return Ok(STREAM_ID_MAX);
    }

    let text = to_utf8(raw.to_vec())?;
    match text.split_once('-') {
        Some((ms, seq)) => Ok((parse_int_str::<u64>(ms)?, parse_int_str::<u64>(seq)?)),
        None => {
            let ms = parse_int_str::<u64>(&text)?;
            Ok(if low { (ms, 0) } else { (ms, u64::MAX) })
        }
    }
}

fn parse_xrange(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.len() != 3 {
        return Err(RedisError::wrong_arity("XRANGE"));
    }
    let key = args.pop_front().unwrap();
    let start = parse_xrange_bound(&args.pop_front().unwrap(), true)?;
    let end = parse_xrange_bound(&args.pop_front().unwrap(), false)?;
    Ok(Command::Xrange { key, start, end })
}

fn parse_xread(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    let mut block = None;

    loop {
        match args.front() {
            Some(token) if to_utf8(token.clone())?.eq_ignore_ascii_case("BLOCK") => {
                args.pop_front();
                let raw = args
                    .pop_front()
                    .ok_or_else(|| RedisError::wrong_arity("XREAD"))?;
                block = Some(parse_int::<u64>(&raw)?);
            }
            Some(token) if to_utf8(token.clone())?.eq_ignore_ascii_case("STREAMS") => {
                args.pop_front();
                break;
            }
            _ => return Err(RedisError::invalid_argument("syntax error")),
        }
    }

    let remaining: Vec<Vec<u8>> = args.into();
    if remaining.is_empty() || remaining.len() % 2 != 0 {
        return Err(RedisError::invalid_argument(
            "Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified.",
        ));
    }

    let n = remaining.len() / 2;
    let (keys, ids) = remaining.split_at(n);

    let mut streams = Vec::with_capacity(n);
    for (key, id) in keys.iter().zip(ids.iter()) {
        let parsed_id = if id.as_slice() == b"$" {
            XReadId::Dollar
        } else {
            XReadId::Explicit(parse_xread_id(id)?)
        };
        streams.push((key.clone(), parsed_id));
    }

    Ok(Command::Xread { block, streams })
}

fn parse_xread_id(raw: &[u8]) -> Result<StreamId, RedisError> {
    let text = to_utf8(raw.to_vec())?;
    match text.split_once('-') {
        Some((ms, seq)) => Ok((parse_int_str::<u64>(ms)?, parse_int_str::<u64>(seq)?)),
        None => Ok((parse_int_str::<u64>(&text)?, 0)),
    }
}

fn parse_no_args(args: VecDeque<Vec<u8>>, name: &str, command: Command) -> Result<Command, RedisError> {
    if !args.is_empty() {
        return Err(RedisError::wrong_arity(name));
    }
    Ok(command)
}

fn parse_psync(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.len() != 2 {
        return Err(RedisError::wrong_arity("PSYNC"));
    }

    let replid = args.pop_front().unwrap();
    let replid = if replid == b"?" { None } else { Some(replid) };

    let offset_raw = args.pop_front().unwrap();
    let offset = if offset_raw == b"-1" {
        None
    } else {
        Some(parse_int::<i64>(&offset_raw)?)
    };

    Ok(Command::Psync { replid, offset })
}

fn parse_wait(mut args: VecDeque<Vec<u8>>) -> Result<Command, RedisError> {
    if args.len() != 2 {
        return Err(RedisError::wrong_arity("WAIT"));
    }
    let numreplicas = parse_int::<i64>(&args.pop_front().unwrap())?;
    let timeout_ms = parse_int::<i64>(&args.pop_front().unwrap())?;
    Ok(Command::Wait {
        numreplicas,
        timeout_ms,
    })
}

fn to_utf8(bytes: Vec<u8>) -> Result<String, RedisError> {
    String::from_utf8(bytes)
        .map_err(|_| RedisError::invalid_argument("invalid UTF-8 in argument"))
}

fn parse_int<T: std::str::FromStr>(bytes: &[u8]) -> Result<T, RedisError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(RedisError::NotInteger)
}

fn parse_int_str<T: std::str::FromStr>(s: &str) -> Result<T, RedisError> {
    s.parse().map_err(|_| RedisError::NotInteger)
}

fn parse_float(bytes: &[u8]) -> Result<f64, RedisError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RedisError::invalid_argument("timeout is not a float or out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str]) -> Result<Command, RedisError> {
        let values = args
            .iter()
            .map(|a| Value::BulkString(a.as_bytes().to_vec()))
            .collect();
        from_value(Value::Array(values))
    }

    #[test]
    fn parses_ping_and_echo() {
        assert_eq!(command(&["PING"]).unwrap(), Command::Ping { message: None });
        assert_eq!(
            command(&["ping", "hi"]).unwrap(),
            Command::Ping {
                message: Some(b"hi".to_vec())
            }
        );
        assert_eq!(
            command(&["ECHO", "hi"]).unwrap(),
            Command::Echo {
                message: b"hi".to_vec()
            }
        );
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(matches!(
            command(&["FROB"]),
            Err(RedisError::UnknownCommand(_))
        ));
    }

    #[test]
    fn set_requires_expiry_pair() {
        assert!(command(&["SET", "k", "v", "PX"]).is_err());
        assert_eq!(
            command(&["SET", "k", "v", "PX", "100"]).unwrap(),
            Command::Set {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
                expiry: Some(Expiry::Millis(100)),
            }
        );
    }

    #[test]
    fn xadd_auto_and_partial_ids() {
        assert_eq!(
            command(&["XADD", "s", "*", "f", "v"]).unwrap(),
            Command::Xadd {
                key: b"s".to_vec(),
                id: StreamIdSpec::Auto,
                fields: vec![(b"f".to_vec(), b"v".to_vec())],
            }
        );
        assert_eq!(
            command(&["XADD", "s", "5-*", "f", "v"]).unwrap(),
            Command::Xadd {
                key: b"s".to_vec(),
                id: StreamIdSpec::Partial(5),
                fields: vec![(b"f".to_vec(), b"v".to_vec())],
            }
        );
    }

    #[test]
    fn xrange_sentinels() {
        assert_eq!(
            command(&["XRANGE", "s", "-", "+"]).unwrap(),
            Command::Xrange {
                key: b"s".to_vec(),
                start: (0, 0),
                end: STREAM_ID_MAX,
            }
        );
    }

    #[test]
    fn xread_with_block_and_dollar() {
        assert_eq!(
            command(&["XREAD", "BLOCK", "100", "STREAMS", "s", "$"]).unwrap(),
            Command::Xread {
                block: Some(100),
                streams: vec![(b"s".to_vec(), XReadId::Dollar)],
            }
        );
    }
}
