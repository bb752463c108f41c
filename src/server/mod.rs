pub mod handlers;
mod listener;
mod session;

use crate::config::Args;
use crate::replication::{self, ReplicaRegistry};
use crate::store::Store;
use handlers::ServerContext;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Builds the shared server state and runs until shutdown. The entry point
/// `main.rs` calls into.
pub async fn run(args: Args) -> anyhow::Result<()> {
    let replica_of = args
        .replica_of_addr()
        .transpose()
        .map_err(|message| anyhow::anyhow!(message))?;

    let ctx = Arc::new(ServerContext {
        store: Arc::new(Store::new()),
        registry: Arc::new(ReplicaRegistry::new()),
        replid: replication::generate_replid(),
        is_replica: replica_of.is_some(),
        master_offset: Arc::new(AtomicU64::new(0)),
    });

    listener::run(ctx, args.port, args.port, replica_of).await
}
