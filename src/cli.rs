//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// EDR token refresh - issue, inspect and manage data-plane access credentials
#[derive(Parser, Debug)]
#[command(name = "edr-refresh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "EDR_REFRESH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "EDR_REFRESH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "EDR_REFRESH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate an ES256 signing key pair
    Keygen {
        /// Directory to write `<name>.key.pem` and `<name>.pub.pem` into
        #[arg(short, long, default_value = "keys")]
        out_dir: PathBuf,

        /// File name stem
        #[arg(long, default_value = "signing")]
        name: String,
    },

    /// Load, validate and print the effective configuration
    CheckConfig,

    /// Issue a credential with the configured key (in-memory store and vault)
    Issue {
        /// Identifier of the holder the credential is issued to
        #[arg(short, long, required = true)]
        audience: String,

        /// Transfer process the credential belongs to
        #[arg(long)]
        process_id: Option<String>,

        /// Token id (random UUID when omitted)
        #[arg(long)]
        jti: Option<String>,

        /// Asset id recorded in the data address
        #[arg(long)]
        asset_id: Option<String>,
    },

    /// Print the header and claims of a token without verifying it
    Inspect {
        /// Compact JWS
        #[arg(required = true)]
        token: String,
    },
}
