pub mod command;
pub mod error;
pub mod value;

pub use command::{
    Command, CommandReadError, CommandReader, Expiry, StreamId, StreamIdSpec, XReadId,
    STREAM_ID_MAX,
};
pub use error::RedisError;
pub use value::{Value, ValueReadError, ValueReader, ValueWriter};
