use clap::{Parser, Subcommand};

use crate::consts::CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Capture, publish and relay alerts until interrupted
    Run {
        /// YAML configuration file, environment variables take precedence
        #[arg(short, long, default_value = CONFIG_PATH)]
        config: String,
    },

    /// List the interfaces available for capture
    Interfaces,
}

impl Args {
    /// Subcommand to execute, `run` with the default configuration when omitted.
    pub fn command(self) -> Command {
        self.command.unwrap_or(Command::Run {
            config: CONFIG_PATH.to_owned(),
        })
    }
}
