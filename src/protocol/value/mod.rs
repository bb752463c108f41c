mod reader;
mod writer;

pub use reader::*;
pub use writer::*;

/// A single RESP2 value: one of the five wire types, plus the two null
/// sentinels. Dispatch throughout the codec and the command layer is a
/// match on this tag rather than virtual dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    SimpleString(String),
    SimpleError(String),
    Integer(i64),
    BulkString(Vec<u8>),
    Array(Vec<Value>),
    NullBulkString,
    NullArray,
}

impl Value {
    pub fn simple_string(value: impl Into<String>) -> Self {
        Self::SimpleString(value.into())
    }

    pub fn simple_error(value: impl Into<String>) -> Self {
        Self::SimpleError(value.into())
    }

    pub fn bulk_string(value: impl Into<Vec<u8>>) -> Self {
        Self::BulkString(value.into())
    }

    pub fn integer(value: i64) -> Self {
        Self::Integer(value)
    }

    pub fn ok() -> Self {
        Self::simple_string("OK")
    }

    /// Builds `*<1+args.len()>\r\n$..\r\ncommand\r\n...` out of a command
    /// name and its already-encoded-as-bytes arguments. Used to construct
    /// outbound protocol messages that don't originate from a client frame
    /// (handshake steps, REPLCONF GETACK sent to replicas).
    pub fn command(name: &str, args: &[&[u8]]) -> Self {
        build_command(name, args.iter().map(|arg| arg.to_vec()))
    }

    pub fn command_str(name: &str, args: &[&str]) -> Self {
        build_command(name, args.iter().map(|arg| arg.as_bytes().to_vec()))
    }

    /// The exact number of bytes `ValueWriter::write` would emit for this
    /// value. Computed from content rather than cached, so it can never
    /// drift from what the writer actually produces.
    pub fn size(&self) -> usize {
        match self {
            Value::SimpleString(s) => 1 + s.len() + 2,
            Value::SimpleError(s) => 1 + s.len() + 2,
            Value::Integer(v) => 1 + v.to_string().len() + 2,
            Value::BulkString(bytes) => 1 + bytes.len().to_string().len() + 2 + bytes.len() + 2,
            Value::Array(values) => {
                1 + values.len().to_string().len()
                    + 2
                    + values.iter().map(Value::size).sum::<usize>()
            }
            Value::NullBulkString => 5,
            Value::NullArray => 5,
        }
    }

}

fn build_command(name: &str, args: impl Iterator<Item = Vec<u8>>) -> Value {
    let mut array = Vec::with_capacity(args.size_hint().0 + 1);
    array.push(Value::bulk_string(name.as_bytes().to_vec()));
    array.extend(args.map(Value::bulk_string));
    Value::Array(array)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_matches_encoded_length() {
        let cases = vec![
            Value::simple_string("OK"),
            Value::simple_error("ERR boom"),
            Value::integer(0),
            Value::integer(i64::MIN),
            Value::integer(i64::MAX),
            Value::bulk_string("hello".as_bytes().to_vec()),
            Value::bulk_string(Vec::new()),
            Value::NullBulkString,
            Value::NullArray,
            Value::Array(vec![]),
            Value::command_str("SET", &["key", "value"]),
        ];

        for value in cases {
            let encoded = super::writer::encode_sync(&value);
            assert_eq!(value.size(), encoded.len(), "size mismatch for {:?}", value);
        }
    }
}
