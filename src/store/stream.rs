use crate::protocol::{RedisError, StreamId, StreamIdSpec};

/// One appended entry: its assigned id and ordered field/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

/// The stream value kind: an append-only, strictly-increasing-id sequence
/// of entries. Id assignment rules are in `append`; see SPEC_FULL §4.B.
#[derive(Debug, Clone, Default)]
pub struct StreamValue {
    entries: Vec<StreamEntry>,
    last_id: StreamId,
}

impl StreamValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    pub fn last_entry(&self) -> Option<&StreamEntry> {
        self.entries.last()
    }

    pub fn append(
        &mut self,
        spec: StreamIdSpec,
        fields: Vec<(Vec<u8>, Vec<u8>)>,
        now_ms: u64,
    ) -> Result<StreamId, RedisError> {
        let id = self.resolve_id(spec, now_ms)?;

        if id == (0, 0) {
            return Err(RedisError::StreamIdZero);
        }
        if id <= self.last_id {
            return Err(RedisError::StreamIdTooSmall);
        }

        self.entries.push(StreamEntry { id, fields });
        self.last_id = id;
        Ok(id)
    }

    fn resolve_id(&self, spec: StreamIdSpec, now_ms: u64) -> Result<StreamId, RedisError> {
        match spec {
            StreamIdSpec::Explicit(id) => Ok(id),
            StreamIdSpec::Partial(ms) => {
                let seq = if self.entries.is_empty() && ms == 0 {
                    1
                } else if ms == self.last_id.0 {
                    self.last_id
                        .1
                        .checked_add(1)
                        .ok_or(RedisError::SeqOverflow)?
                } else {
                    0
                };
                Ok((ms, seq))
            }
            StreamIdSpec::Auto => {
                let ms = now_ms.max(self.last_id.0);
                let seq = if ms == self.last_id.0 {
                    self.last_id
                        .1
                        .checked_add(1)
                        .ok_or(RedisError::SeqOverflow)?
                } else {
                    0
                };
                Ok((ms, seq))
            }
        }
    }

    pub fn range(&self, start: StreamId, end: StreamId) -> Vec<StreamEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.id >= start && entry.id <= end)
            .cloned()
            .collect()
    }

    pub fn after(&self, id: StreamId) -> Vec<StreamEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.id > id)
            .cloned()
            .collect()
    }
}
