use super::{Command, Expiry, StreamId, StreamIdSpec, XReadId};
use crate::protocol::Value;

pub fn to_value(command: &Command) -> Value {
    match command {
        Command::Ping { message: Some(m) } => Value::command("PING", &[m]),
        Command::Ping { message: None } => Value::command("PING", &[]),
        Command::Echo { message } => Value::command("ECHO", &[message]),
        Command::Get { key } => Value::command("GET", &[key]),
        Command::Set {
            key,
            value,
            expiry: None,
        } => Value::command("SET", &[key, value]),
        Command::Set {
            key,
            value,
            expiry: Some(expiry),
        } => {
            let (unit, amount) = format_expiry(expiry);
            Value::command("SET", &[key, value, unit.as_bytes(), amount.as_bytes()])
        }
        Command::Incr { key } => Value::command("INCR", &[key]),
        Command::Rpush { key, values } => push_value("RPUSH", key, values),
        Command::Lpush { key, values } => push_value("LPUSH", key, values),
        Command::Lrange { key, start, stop } => {
            let start = start.to_string();
            let stop = stop.to_string();
            Value::command("LRANGE", &[key, start.as_bytes(), stop.as_bytes()])
        }
        Command::Llen { key } => Value::command("LLEN", &[key]),
        Command::Lpop { key, count: None } => Value::command("LPOP", &[key]),
        Command::Lpop {
            key,
            count: Some(count),
        } => {
            let count = count.to_string();
            Value::command("LPOP", &[key, count.as_bytes()])
        }
        Command::Blpop { key, timeout } => {
            let timeout = timeout.to_string();
            Value::command("BLPOP", &[key, timeout.as_bytes()])
        }
        Command::Type { key } => Value::command("TYPE", &[key]),
        Command::Xadd { key, id, fields } => {
            let id = format_stream_id_spec(id);
            let mut args: Vec<&[u8]> = vec![key, id.as_bytes()];
            for (field, value) in fields {
                args.push(field);
                args.push(value);
            }
            Value::command("XADD", &args)
        }
        Command::Xrange { key, start, end } => {
            let start = format_stream_id(start);
            let end = format_stream_id(end);
            Value::command("XRANGE", &[key, start.as_bytes(), end.as_bytes()])
        }
        Command::Xread { block, streams } => {
            let mut args: Vec<Vec<u8>> = Vec::new();
            if let Some(ms) = block {
                args.push(b"BLOCK".to_vec());
                args.push(ms.to_string().into_bytes());
            }
            args.push(b"STREAMS".to_vec());
            for (key, _) in streams {
                args.push(key.clone());
            }
            for (_, id) in streams {
                args.push(format_xread_id(id).into_bytes());
            }
            let refs: Vec<&[u8]> = args.iter().map(|a| a.as_slice()).collect();
            Value::command("XREAD", &refs)
        }
        Command::Multi => Value::command("MULTI", &[]),
        Command::Exec => Value::command("EXEC", &[]),
        Command::Discard => Value::command("DISCARD", &[]),
        Command::Info { sections } => {
            let refs: Vec<&[u8]> = sections.iter().map(|s| s.as_slice()).collect();
            Value::command("INFO", &refs)
        }
        Command::Replconf { args } => {
            let refs: Vec<&[u8]> = args.iter().map(|a| a.as_slice()).collect();
            Value::command("REPLCONF", &refs)
        }
        Command::Psync { replid, offset } => {
            let replid = match replid {
                Some(replid) => replid.clone(),
                None => b"?".to_vec(),
            };
            let offset = match offset {
                Some(offset) => offset.to_string(),
                None => "-1".to_string(),
            };
            Value::command("PSYNC", &[&replid, offset.as_bytes()])
        }
        Command::Wait {
            numreplicas,
            timeout_ms,
        } => {
            let numreplicas = numreplicas.to_string();
            let timeout_ms = timeout_ms.to_string();
            Value::command("WAIT", &[numreplicas.as_bytes(), timeout_ms.as_bytes()])
        }
    }
}

fn push_value(name: &str, key: &[u8], values: &[Vec<u8>]) -> Value {
    let mut args: Vec<&[u8]> = Vec::with_capacity(1 + values.len());
    args.push(key);
    args.extend(values.iter().map(|v| v.as_slice()));
    Value::command(name, &args)
}

fn format_expiry(expiry: &Expiry) -> (&'static str, String) {
    match expiry {
        Expiry::Seconds(s) => ("EX", s.to_string()),
        Expiry::Millis(ms) => ("PX", ms.to_string()),
    }
}

fn format_stream_id(id: &StreamId) -> String {
    format!("{}-{}", id.0, id.1)
}

fn format_stream_id_spec(spec: &StreamIdSpec) -> String {
    match spec {
        StreamIdSpec::Auto => "*".to_string(),
        StreamIdSpec::Partial(ms) => format!("{}-*", ms),
        StreamIdSpec::Explicit(id) => format_stream_id(id),
    }
}

fn format_xread_id(id: &XReadId) -> String {
    match id {
        XReadId::Explicit(id) => format_stream_id(id),
        XReadId::Dollar => "$".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Value;

    fn assert_to_value(command: Command, expected: &[&str]) {
        let value = command.to_value();
        let expected = Value::command_str(expected[0], &expected[1..]);
        assert_eq!(value, expected);
    }

    #[test]
    fn ping_no_message() {
        assert_to_value(Command::Ping { message: None }, &["PING"]);
    }

    #[test]
    fn ping_with_message() {
        assert_to_value(
            Command::Ping {
                message: Some(b"message".to_vec()),
            },
            &["PING", "message"],
        );
    }

    #[test]
    fn set_with_expiry() {
        assert_to_value(
            Command::Set {
                key: b"key".to_vec(),
                value: b"value".to_vec(),
                expiry: Some(Expiry::Millis(1000)),
            },
            &["SET", "key", "value", "PX", "1000"],
        );
    }

    #[test]
    fn psync_no_options() {
        assert_to_value(
            Command::Psync {
                replid: None,
                offset: None,
            },
            &["PSYNC", "?", "-1"],
        );
    }

    #[test]
    fn xadd_roundtrips_auto_id() {
        assert_to_value(
            Command::Xadd {
                key: b"s".to_vec(),
                id: StreamIdSpec::Auto,
                fields: vec![(b"f".to_vec(), b"v".to_vec())],
            },
            &["XADD", "s", "*", "f", "v"],
        );
    }

    #[test]
    fn xread_with_dollar() {
        assert_to_value(
            Command::Xread {
                block: Some(100),
                streams: vec![(b"s".to_vec(), XReadId::Dollar)],
            },
            &["XREAD", "BLOCK", "100", "STREAMS", "s", "$"],
        );
    }
}
