//! The tunnel process
//!
//! Hosts the command server, owns the lifecycle controller and drives the
//! periodic refresh of remote profiles. Runs until Ctrl-C; a `stop` command
//! from a client only stops the tunnel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tunnelkit_command::{CommandServer, MessageSink};
use tunnelkit_remote::{RefreshScheduler, RefreshTask, TokioTrigger};
use tunnelkit_service::{
    switch_tunnel, ControllerInstaller, NetworkProfileInstaller, PassthroughEngine,
    StoreConfigSource, TunnelController,
};

use super::Workspace;

/// Time given to in-flight replies before the server goes away
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Run the daemon in the foreground
///
/// # Errors
/// Returns an error if the data directory cannot be opened or the command
/// socket cannot be bound
pub async fn run() -> anyhow::Result<()> {
    let workspace = Workspace::open()?;
    let socket = workspace.settings.socket_path(&workspace.paths);
    let shutdown = CancellationToken::new();

    let server = CommandServer::new(&socket, workspace.settings.status_interval());
    let log: Arc<dyn MessageSink> = Arc::new(server.log_sink());

    let source = Arc::new(StoreConfigSource::new(
        workspace.db.clone(),
        workspace.content.clone(),
        workspace.paths.settings(),
    ));
    let controller = Arc::new(TunnelController::new(
        Arc::new(PassthroughEngine),
        source,
        log,
    ));
    server.set_handler(controller.clone());
    server.set_status_provider(controller.clone());

    let server_cancel = CancellationToken::new();
    let server_task = server
        .start(server_cancel.clone())
        .await
        .context("Failed to start command server")?;

    let installer = ControllerInstaller::new(Arc::clone(&controller));
    let handle = installer.install().await?;
    if let Err(e) = switch_tunnel(handle.as_ref(), true).await {
        tracing::warn!(error = %e, "tunnel did not start; waiting for a reload");
    }

    let trigger = Arc::new(TokioTrigger::default());
    let task = RefreshTask::new(
        RefreshScheduler::new(workspace.manager()?, workspace.settings.update_interval()),
        trigger.clone(),
    );
    task.setup();
    let refresh = {
        let cancel = shutdown.child_token();
        tokio::spawn(async move { trigger.run(&task, cancel).await })
    };

    tracing::info!(socket = %socket.display(), "daemon ready");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
    }
    tracing::info!("interrupted");

    shutdown.cancel();
    switch_tunnel(handle.as_ref(), false).await?;
    if let Err(e) = refresh.await {
        tracing::warn!(error = %e, "refresh task failed");
    }

    server_cancel.cancel();
    if let Err(e) = server_task.await {
        tracing::warn!(error = %e, "command server task failed");
    }
    drain(&server).await;

    tracing::info!("daemon stopped");
    Ok(())
}

/// Wait briefly for connections still writing their last frame
async fn drain(server: &CommandServer) {
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while server.connected_clients() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::debug!(clients = server.connected_clients(), "closing with clients attached");
    }
}
