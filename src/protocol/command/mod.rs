mod format;
mod parse;
mod reader;

use crate::protocol::{RedisError, Value};

pub use reader::{CommandReadError, CommandReader};

/// A stream entry id: `(milliseconds, sequence)`, lexicographically
/// ordered. `(0, 0)` is never a valid assigned id.
pub type StreamId = (u64, u64);

pub const STREAM_ID_MAX: StreamId = (u64::MAX, u64::MAX);

/// How a SET's expiry was requested. The numeric unit conversion (seconds
/// vs. milliseconds) is applied by the store, not here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    Seconds(u64),
    Millis(u64),
}

/// The id argument to XADD, resolved as far as is possible without
/// consulting the stream (full resolution needs the stream's last id and
/// is done in the store).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamIdSpec {
    /// `*` — choose both ms and seq from the current last id / wall clock.
    Auto,
    /// `ms-*` — choose seq for the given ms.
    Partial(u64),
    /// `ms-seq` — used verbatim.
    Explicit(StreamId),
}

/// A single key/id pair inside an XREAD STREAMS clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XReadId {
    /// A concrete id: return entries strictly greater than this.
    Explicit(StreamId),
    /// `$` — snapshot the stream's current last id at dispatch time.
    Dollar,
}

/// A fully parsed client command, with arguments already coerced to their
/// natural types. Produced by the RESP decoder + parser (component A+C);
/// consumed by the handler table (component D).
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Ping {
        message: Option<Vec<u8>>,
    },
    Echo {
        message: Vec<u8>,
    },
    Get {
        key: Vec<u8>,
    },
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        expiry: Option<Expiry>,
    },
    Incr {
        key: Vec<u8>,
    },
    Rpush {
        key: Vec<u8>,
        values: Vec<Vec<u8>>,
    },
    Lpush {
        key: Vec<u8>,
        values: Vec<Vec<u8>>,
    },
    Lrange {
        key: Vec<u8>,
        start: i64,
        stop: i64,
    },
    Llen {
        key: Vec<u8>,
    },
    Lpop {
        key: Vec<u8>,
        count: Option<i64>,
    },
    Blpop {
        key: Vec<u8>,
        timeout: f64,
    },
    Type {
        key: Vec<u8>,
    },
    Xadd {
        key: Vec<u8>,
        id: StreamIdSpec,
        fields: Vec<(Vec<u8>, Vec<u8>)>,
    },
    Xrange {
        key: Vec<u8>,
        start: StreamId,
        end: StreamId,
    },
    Xread {
        block: Option<u64>,
        streams: Vec<(Vec<u8>, XReadId)>,
    },
    Multi,
    Exec,
    Discard,
    Info {
        sections: Vec<Vec<u8>>,
    },
    Replconf {
        args: Vec<Vec<u8>>,
    },
    Psync {
        replid: Option<Vec<u8>>,
        offset: Option<i64>,
    },
    Wait {
        numreplicas: i64,
        timeout_ms: i64,
    },
}

impl Command {
    /// Whether this command, once successfully handled, is a state
    /// mutation that must be propagated to replicas. See SPEC_FULL §4.G.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Set { .. }
                | Self::Rpush { .. }
                | Self::Lpush { .. }
                | Self::Lpop { .. }
                | Self::Incr { .. }
                | Self::Xadd { .. }
        )
    }

    /// Commands that access session-local state (the transaction buffer)
    /// rather than going through the handler table.
    pub fn is_transaction_control(&self) -> bool {
        matches!(self, Self::Multi | Self::Exec | Self::Discard)
    }

    pub fn to_value(&self) -> Value {
        format::to_value(self)
    }
}

impl TryFrom<Value> for Command {
    type Error = RedisError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        parse::from_value(value)
    }
}
