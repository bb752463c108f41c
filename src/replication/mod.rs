pub mod handshake;
pub mod registry;

pub use registry::{ReplicaConnection, ReplicaRegistry};

/// Minimal valid empty RDB payload: the `REDIS0011` header, the `0xFF` EOF
/// opcode, and 8 zero checksum bytes. Opaque to the rest of the system;
/// this stands in for real RDB serialization, which is out of scope.
pub const EMPTY_RDB: &[u8] = &[
    b'R', b'E', b'D', b'I', b'S', b'0', b'0', b'1', b'1', 0xFF, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Generates a 40-character hex replication id. Grounded on
/// `portugueseTorch-redis-rust/src/repl/replica.rs`'s `gen_uuid`, swapped
/// for a plain random hex string since this id carries no meaning beyond
/// uniqueness.
pub fn generate_replid() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..40)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replid_is_forty_hex_chars() {
        let id = generate_replid();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
