use crate::protocol::{RedisError, Value, ValueWriter};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// A replica's connection handle: the write half of its socket, shared
/// between the session that registered it (which keeps only the read half,
/// for incoming `REPLCONF ACK`s) and the registry's broadcast path.
pub type ReplicaConnection = Arc<Mutex<ValueWriter<OwnedWriteHalf>>>;

struct ReplicaRecord {
    listening_port: Option<u16>,
    capabilities: Vec<String>,
    connection: Option<ReplicaConnection>,
    ack_offset: u64,
}

/// Keyed by remote address. Grounded on `comnipl-redis-rwproxy`'s use of
/// `dashmap::DashMap` for its connection/routing tables — the same fit for
/// a concurrently-mutated, keyed registry of replica links.
#[derive(Default)]
pub struct ReplicaRegistry {
    replicas: DashMap<String, ReplicaRecord>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_replica(&self, addr: String, listening_port: u16) -> Result<(), RedisError> {
        match self.replicas.entry(addr) {
            Entry::Occupied(_) => Err(RedisError::invalid_argument(
                "replica already registered for this connection",
            )),
            Entry::Vacant(slot) => {
                slot.insert(ReplicaRecord {
                    listening_port: Some(listening_port),
                    capabilities: Vec::new(),
                    connection: None,
                    ack_offset: 0,
                });
                Ok(())
            }
        }
    }

    pub fn add_capabilities(&self, addr: &str, capabilities: Vec<String>) {
        if let Some(mut record) = self.replicas.get_mut(addr) {
            record.capabilities.extend(capabilities);
        }
    }

    pub fn add_connection(&self, addr: &str, connection: ReplicaConnection) {
        if let Some(mut record) = self.replicas.get_mut(addr) {
            record.connection = Some(connection);
        }
    }

    pub fn update_ack_offset(&self, addr: &str, offset: u64) {
        if let Some(mut record) = self.replicas.get_mut(addr) {
            record.ack_offset = offset;
        }
    }

    pub fn listening_port(&self, addr: &str) -> Option<u16> {
        self.replicas.get(addr).and_then(|r| r.listening_port)
    }

    pub fn count(&self) -> usize {
        self.replicas.len()
    }

    pub fn count_acked_at_least(&self, offset: u64) -> usize {
        self.replicas
            .iter()
            .filter(|record| record.ack_offset >= offset)
            .count()
    }

    /// Writes `value` on every registered connection. A write failure on
    /// one replica is logged and skipped; it never aborts the broadcast to
    /// the others.
    pub async fn broadcast(&self, value: &Value) {
        let connections: Vec<(String, ReplicaConnection)> = self
            .replicas
            .iter()
            .filter_map(|entry| {
                entry
                    .connection
                    .clone()
                    .map(|conn| (entry.key().clone(), conn))
            })
            .collect();

        for (addr, connection) in connections {
            let mut writer = connection.lock().await;
            if let Err(error) = writer.write(value).await {
                tracing::warn!(replica = %addr, %error, "failed to broadcast to replica");
            }
        }
    }

    /// Sends `REPLCONF GETACK *` to every registered connection, used by
    /// `WAIT` to prompt replicas to report their processed offset.
    pub async fn request_acks(&self) {
        self.broadcast(&Value::command_str("REPLCONF", &["GETACK", "*"]))
            .await;
    }

    pub fn close_all(&self) {
        self.replicas.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_replica_rejects_duplicate() {
        let registry = ReplicaRegistry::new();
        registry.add_replica("127.0.0.1:1".to_string(), 6380).unwrap();
        assert!(registry.add_replica("127.0.0.1:1".to_string(), 6381).is_err());
    }

    #[test]
    fn ack_counting() {
        let registry = ReplicaRegistry::new();
        registry.add_replica("a".to_string(), 1).unwrap();
        registry.add_replica("b".to_string(), 2).unwrap();
        registry.update_ack_offset("a", 100);
        registry.update_ack_offset("b", 40);
        assert_eq!(registry.count_acked_at_least(50), 1);
        assert_eq!(registry.count_acked_at_least(10), 2);
    }
}
