use crate::replication;
use crate::server::handlers::ServerContext;
use crate::server::session::Session;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

/// Binds the listener and runs the accept loop, optionally alongside an
/// outbound replica-of dial, until a shutdown signal arrives. Grounded on
/// `comnipl-redis-rwproxy/src/main.rs`'s `accept_loop`/`shutdown_signal`
/// pair, extended with the graceful-drain join SPEC_FULL §4.H calls for.
pub async fn run(
    ctx: Arc<ServerContext>,
    port: u16,
    listening_port: u16,
    replica_of: Option<(String, u16)>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {}", port))?;
    tracing::info!(%port, "listening");

    let mut tasks = JoinSet::new();

    if let Some((host, master_port)) = replica_of {
        let ctx = ctx.clone();
        tasks.spawn(async move {
            if let Err(error) = run_replica_link(ctx, host, master_port, listening_port).await {
                tracing::warn!(%error, "replication link failed");
            }
        });
    }

    tokio::select! {
        result = accept_loop(listener, ctx.clone(), &mut tasks) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown requested");
        }
    }

    ctx.registry.close_all();

    let drain = tokio::time::timeout(Duration::from_secs(5), async {
        while tasks.join_next().await.is_some() {}
    });
    if drain.await.is_err() {
        tracing::warn!("timed out waiting for sessions to finish draining");
    }

    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    tasks: &mut JoinSet<()>,
) -> anyhow::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await.context("accept failed")?;
        tracing::info!(client = %addr, "accepted connection");
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let session = Session::new(stream, addr.to_string(), false);
            session.run(ctx).await;
        });
    }
}

async fn run_replica_link(
    ctx: Arc<ServerContext>,
    host: String,
    master_port: u16,
    listening_port: u16,
) -> anyhow::Result<()> {
    let master_addr = format!("{}:{}", host, master_port);
    tracing::info!(master = %master_addr, "connecting to master");
    let (reader, writer) = replication::handshake::connect(&master_addr, listening_port)
        .await
        .context("replica handshake failed")?;
    let session = Session::from_parts(reader, writer, master_addr, true);
    session.run(ctx).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
