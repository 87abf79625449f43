// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "mitto", version, about = "Multi-conversation orchestrator fronting long-running ACP coding agents")]
pub struct Cli {
    /// Explicit config file, applied on top of the layered search path.
    #[arg(long, global = true, env = "MITTO_RC")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the session manager, periodic scheduler, and tool-server
    /// transports; block until SIGINT/SIGTERM, then shut down gracefully.
    Serve,

    /// Print the merged, resolved configuration as YAML.
    ShowConfig,

    /// List sessions known to the on-disk session store.
    Sessions {
        #[command(subcommand)]
        command: SessionsCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionsCommands {
    /// Print a table of persisted sessions (id, name, archived, last message).
    List,
}
