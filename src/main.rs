//! cgmgr - inspect and exercise cgroup placement from the command line

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use cgmgr::{metrics, new_manager, CgroupConfig};
use clap::{Parser, Subcommand};
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "cgmgr")]
#[command(version, about = "Place sandboxes, containers and conmon in the cgroup tree", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Manager backend, overrides the configuration
    #[arg(long, value_name = "systemd|cgroupfs", global = true)]
    manager: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Commands {
    /// Bookkeeping path of a container
    ContainerPath { parent: String, id: String },

    /// Container path below the cgroup mount
    AbsolutePath { parent: String, id: String },

    /// Validate a sandbox parent and check its memory
    SandboxPath { parent: String, id: String },

    /// Create the sandbox cgroup
    CreateSandbox { parent: String, id: String },

    /// Move a running conmon into its cgroup
    MoveConmon {
        id: String,
        parent: String,
        /// Supervisor cgroup hint: "", "pod" or a slice
        hint: String,
        pid: u32,
    },

    /// Remove a path returned by move-conmon
    Remove { cleanup_path: String },
}

fn run(cli: Cli) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut config = match &cli.config {
        Some(path) => CgroupConfig::from_json(&fs::read_to_string(path)?)?,
        None => CgroupConfig::default(),
    };
    if let Some(name) = cli.manager {
        config.manager = name;
    }

    cgmgr::tracing::init_tracing(cli.json_logs)?;
    metrics::register();

    let manager = new_manager(&config)?;

    match cli.command {
        Commands::ContainerPath { parent, id } => {
            println!("{}", manager.container_cgroup_path(&parent, &id))
        }
        Commands::AbsolutePath { parent, id } => {
            println!("{}", manager.container_cgroup_absolute_path(&parent, &id)?)
        }
        Commands::SandboxPath { parent, id } => {
            let (parent, path) = manager.sandbox_cgroup_path(&parent, &id)?;
            println!("parent={} path={}", parent, path);
        }
        Commands::CreateSandbox { parent, id } => manager.create_sandbox_cgroup(&parent, &id)?,
        Commands::MoveConmon {
            id,
            parent,
            hint,
            pid,
        } => {
            let cleanup = manager.move_supervisor_to_cgroup(&id, &parent, &hint, pid)?;
            println!("cleanup={}", cleanup);
        }
        Commands::Remove { cleanup_path } => manager.remove_cgroup(&cleanup_path)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "cgmgr failed");
            eprintln!("cgmgr: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_move_conmon_pid_is_numeric() {
        let cli = Cli::try_parse_from([
            "cgmgr",
            "--manager",
            "cgroupfs",
            "move-conmon",
            "abc",
            "/kubepods/pod1",
            "",
            "4242",
        ])
        .unwrap();
        assert_eq!(cli.manager.as_deref(), Some("cgroupfs"));
        assert_eq!(
            cli.command,
            Commands::MoveConmon {
                id: "abc".to_string(),
                parent: "/kubepods/pod1".to_string(),
                hint: String::new(),
                pid: 4242,
            }
        );

        assert!(Cli::try_parse_from(["cgmgr", "move-conmon", "abc", "p", "", "conmon"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["cgmgr", "remove", "/crio/crio-conmon-abc", "--json-logs"])
            .unwrap();
        assert!(cli.json_logs);
        assert_eq!(
            cli.command,
            Commands::Remove {
                cleanup_path: "/crio/crio-conmon-abc".to_string()
            }
        );
    }

    #[test]
    fn test_missing_arguments_rejected() {
        assert!(Cli::try_parse_from(["cgmgr", "sandbox-path", "machine.slice"]).is_err());
        assert!(Cli::try_parse_from(["cgmgr"]).is_err());
    }
}
