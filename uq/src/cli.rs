//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// uq - USSD command scheduler
#[derive(Parser)]
#[command(
    name = "uq",
    about = "Queue and run USSD commands across devices and SIMs with daily quotas",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage devices
    Device {
        #[command(subcommand)]
        command: DeviceCommand,
    },

    /// Inspect SIMs and their quotas
    Sim {
        #[command(subcommand)]
        command: SimCommand,
    },

    /// Queue a USSD command
    Submit {
        /// Target SIM ID (or partial match)
        #[arg(short, long)]
        sim: String,

        /// USSD code, e.g. *580#
        code: String,

        /// Command type (activation, check, topup)
        #[arg(short = 't', long = "type", default_value = "check")]
        command_type: String,

        /// Carrier (INWI, ORANGE, IAM); defaults to the SIM's carrier
        #[arg(long)]
        carrier: Option<String>,
    },

    /// Show command history
    History {
        /// Filter by status (pending, executing, success, failed, quota_exceeded)
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by SIM ID (or partial match)
        #[arg(long)]
        sim: Option<String>,

        /// Filter by device ID (or partial match)
        #[arg(long)]
        device: Option<String>,

        /// Case-insensitive text matched against code, result and SIM
        #[arg(short = 'q', long)]
        search: Option<String>,

        /// Oldest first instead of newest first
        #[arg(long)]
        oldest_first: bool,

        /// Maximum rows to show
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Execute a pending command now
    Execute {
        /// Command ID
        id: u64,
    },

    /// Multi-step USSD sessions
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Run the scheduler loop until Ctrl-C
    Run {
        /// Start with automatic execution turned off
        #[arg(long)]
        manual: bool,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Show overview statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Device management subcommands
#[derive(Debug, Subcommand)]
pub enum DeviceCommand {
    /// Register a device and provision its SIMs
    Add {
        /// Device name
        name: String,

        /// Number of SIMs to provision
        #[arg(long)]
        sims: Option<u32>,
    },

    /// List devices, newest first
    List {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Record a heartbeat for a device
    Touch {
        /// Device ID (or partial match)
        id: String,
    },
}

/// SIM subcommands
#[derive(Debug, Subcommand)]
pub enum SimCommand {
    /// List SIMs with usage
    List {
        /// Only SIMs of this device (or partial match)
        #[arg(long)]
        device: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Apply the daily quota reset for today
    Reset,
}

/// Session subcommands
#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Open and run a session: a USSD code followed by menu inputs
    Run {
        /// Target SIM ID (or partial match)
        #[arg(short, long)]
        sim: String,

        /// Steps, e.g. *100# 1 2
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
    },

    /// List sessions
    List {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one session with its steps
    Show {
        /// Session ID (or partial match)
        id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ussdq")
        .join("logs")
        .join("ussdq.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Output format for list and stats commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TEXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from(["uq", "submit", "--sim", "sim-1", "*580#", "-t", "topup"]).unwrap();
        match cli.command {
            Some(Command::Submit {
                sim,
                code,
                command_type,
                carrier,
            }) => {
                assert_eq!(sim, "sim-1");
                assert_eq!(code, "*580#");
                assert_eq!(command_type, "topup");
                assert!(carrier.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_session_inputs() {
        let cli = Cli::try_parse_from(["uq", "session", "run", "--sim", "sim-1", "*100#", "1", "2"]).unwrap();
        match cli.command {
            Some(Command::Session {
                command: SessionCommand::Run { inputs, .. },
            }) => assert_eq!(inputs, vec!["*100#", "1", "2"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_log_path_location() {
        assert!(get_log_path().ends_with("ussdq/logs/ussdq.log"));
    }
}
