//! Profile CLI commands
//!
//! Handles: tunnelkit profile list/show/create/edit/set-content/delete/move/
//! update/check/select and tunnelkit refresh

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Subcommand;
use tunnelkit_command::{ChannelError, StandaloneClient};
use tunnelkit_core::{Profile, ProfileKind};
use tunnelkit_remote::{ProfileEdit, RefreshScheduler};

use super::Workspace;

/// Profile commands
#[derive(Subcommand)]
pub enum ProfileCommands {
    /// List all profiles in order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show profile details
    Show {
        /// Profile ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a profile (local and empty unless a source is given)
    Create {
        /// Display name
        name: String,
        /// Import the configuration from this file
        #[arg(long, conflicts_with_all = ["vault", "url"])]
        file: Option<PathBuf>,
        /// Keep the configuration in the vault at this relative path
        #[arg(long, conflicts_with = "url")]
        vault: Option<String>,
        /// Fetch the configuration from this URL
        #[arg(long)]
        url: Option<String>,
        /// Refresh the remote configuration periodically
        #[arg(long, requires = "url")]
        auto_update: bool,
    },
    /// Change a profile's name, remote URL or auto-update flag
    Edit {
        /// Profile ID
        id: i64,
        /// New display name
        #[arg(long)]
        name: Option<String>,
        /// New remote URL (remote profiles only)
        #[arg(long)]
        url: Option<String>,
        /// Enable or disable periodic refresh (remote profiles only)
        #[arg(long)]
        auto_update: Option<bool>,
    },
    /// Replace a profile's configuration with the contents of a file
    SetContent {
        /// Profile ID
        id: i64,
        /// File holding the new configuration
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete profiles
    Delete {
        /// Profile IDs
        #[arg(required = true)]
        ids: Vec<i64>,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Move a profile to a new position
    Move {
        /// Profile ID
        id: i64,
        /// Zero-based target position
        index: usize,
    },
    /// Fetch a remote profile's configuration again
    Update {
        /// Profile ID
        id: i64,
    },
    /// Check a profile's configuration
    Check {
        /// Profile ID
        id: i64,
    },
    /// Select the profile the tunnel starts with
    Select {
        /// Profile ID
        id: i64,
    },
}

/// Execute profile command
pub async fn execute(cmd: ProfileCommands) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = Workspace::open()?;

    match cmd {
        ProfileCommands::List { json } => {
            let profiles = workspace.db.with_store(|store| store.list())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profiles)?);
            } else if profiles.is_empty() {
                println!("No profiles found.");
            } else {
                println!("Profiles:");
                for p in &profiles {
                    let id = p.id.unwrap_or_default();
                    let marker = if id == workspace.settings.selected_profile_id {
                        "*"
                    } else {
                        " "
                    };
                    println!("{marker} {id} - {} ({})", p.name, p.kind);
                }
            }
        }
        ProfileCommands::Show { id, json } => {
            let profile = workspace.db.with_store(|store| store.get(id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                print_profile(&workspace, &profile)?;
            }
        }
        ProfileCommands::Create {
            name,
            file,
            vault,
            url,
            auto_update,
        } => {
            let manager = workspace.manager()?;
            let profile = match (file, vault, url) {
                (_, _, Some(url)) => {
                    println!("Fetching {url}");
                    manager.create_remote(&name, &url, auto_update).await?
                }
                (_, Some(vault), None) => manager.create_vault(&name, &vault)?,
                (file, None, None) => manager.create_local(&name, file.as_deref())?,
            };
            println!("Created profile: {}", profile.id.unwrap_or_default());
        }
        ProfileCommands::Edit {
            id,
            name,
            url,
            auto_update,
        } => {
            if name.is_none() && url.is_none() && auto_update.is_none() {
                return Err("Nothing to change; pass --name, --url or --auto-update".into());
            }
            let edit = ProfileEdit {
                name,
                remote_url: url,
                auto_update,
            };
            let profile = workspace.manager()?.edit(id, &edit)?;
            println!("Updated profile: {}", profile.name);
        }
        ProfileCommands::SetContent { id, file } => {
            let content = fs::read_to_string(&file)
                .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;
            let profile = workspace.manager()?.set_content(id, &content)?;
            println!("Replaced configuration: {}", profile.name);
        }
        ProfileCommands::Delete { ids, force } => {
            let profiles = workspace
                .db
                .with_store(|store| ids.iter().map(|id| store.get(*id)).collect::<Result<Vec<_>, _>>())?;

            if !force {
                let names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
                print!("Delete {} profile(s) ({})? [y/N] ", names.len(), names.join(", "));
                io::stdout().flush()?;
                let mut input = String::new();
                io::stdin().read_line(&mut input)?;
                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            let deleted = workspace.manager()?.delete(&ids)?;
            println!("Deleted {deleted} profile(s).");
        }
        ProfileCommands::Move { id, index } => {
            workspace.manager()?.move_to(id, index)?;
            println!("Moved profile {id} to position {index}.");
        }
        ProfileCommands::Update { id } => {
            let profile = workspace.db.with_store(|store| store.get(id))?;
            let updated = workspace.manager()?.update_remote_profile(&profile).await?;
            println!("Updated profile: {}", updated.name);
        }
        ProfileCommands::Check { id } => {
            let profile = workspace.db.with_store(|store| store.get(id))?;
            workspace.manager()?.check(&profile)?;
            println!("Configuration OK: {}", profile.name);
        }
        ProfileCommands::Select { id } => {
            let profile = workspace.db.with_store(|store| store.get(id))?;
            let mut settings = workspace.settings.clone();
            settings.selected_profile_id = id;
            settings.save(&workspace.paths.settings())?;
            println!("Selected profile: {}", profile.name);
            reload_running_tunnel(&settings.socket_path(&workspace.paths)).await;
        }
    }

    Ok(())
}

/// Run one refresh pass over the auto-updating remote profiles
pub async fn refresh() -> Result<(), Box<dyn std::error::Error>> {
    let workspace = Workspace::open()?;
    let scheduler = RefreshScheduler::new(workspace.manager()?, workspace.settings.update_interval());

    let report = scheduler.run().await?;
    if report.updated.is_empty() && report.failed.is_empty() {
        println!("No auto-updating profiles.");
        return Ok(());
    }

    for id in &report.updated {
        println!("Updated profile {id}");
    }
    for (id, message) in &report.failed {
        println!("Failed to update profile {id}: {message}");
    }

    if report.success() {
        Ok(())
    } else {
        Err(format!("{} profile(s) failed to update", report.failed.len()).into())
    }
}

/// Restart a running daemon's tunnel on the new selection
///
/// No daemon is not an error; the selection applies on its next start.
async fn reload_running_tunnel(socket: &Path) {
    match StandaloneClient::new(socket).reload().await {
        Ok(()) => println!("Tunnel reloaded."),
        Err(ChannelError::Transport(e)) => tracing::debug!(error = %e, "no daemon to reload"),
        Err(e) => eprintln!("Warning: tunnel reload failed: {e}"),
    }
}

fn print_profile(workspace: &Workspace, profile: &Profile) -> Result<(), Box<dyn std::error::Error>> {
    let id = profile.id.unwrap_or_default();
    println!("Profile: {}", profile.name);
    println!("ID: {id}");
    println!("Type: {}", profile.kind);
    println!("Order: {}", profile.order);
    println!("Content: {}", workspace.content.resolve(profile)?.display());
    if profile.kind == ProfileKind::Remote {
        if let Some(url) = &profile.remote_url {
            println!("Remote URL: {url}");
        }
        println!("Auto update: {}", profile.auto_update);
        match profile.last_updated {
            Some(at) => println!(
                "Last updated: {}",
                at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("Last updated: never"),
        }
    }
    println!("Selected: {}", id == workspace.settings.selected_profile_id);
    Ok(())
}
