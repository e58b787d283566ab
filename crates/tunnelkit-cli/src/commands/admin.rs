//! Administrative commands for a running daemon
//!
//! Handles: tunnelkit reload/stop/close-connections

use tunnelkit_command::StandaloneClient;

#[derive(Debug, Clone, Copy)]
pub enum AdminCommand {
    Reload,
    Stop,
    CloseConnections,
}

/// Send one administrative command and wait for the daemon's answer
pub async fn execute(cmd: AdminCommand) -> Result<(), Box<dyn std::error::Error>> {
    let path = super::socket_path()?;
    let client = StandaloneClient::new(&path);

    match cmd {
        AdminCommand::Reload => client.reload().await?,
        AdminCommand::Stop => client.stop().await?,
        AdminCommand::CloseConnections => client.close_connections().await?,
    }

    match cmd {
        AdminCommand::Reload => println!("Tunnel reloaded."),
        AdminCommand::Stop => println!("Tunnel stopped."),
        AdminCommand::CloseConnections => println!("Connections closed."),
    }
    Ok(())
}
