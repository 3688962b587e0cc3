//! Command-line interface for speakstream
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Speak streamed text through a live speech-synthesis session
#[derive(Parser, Debug)]
#[command(
    name = "speakstream",
    version,
    about = "Speak streamed text through a live speech-synthesis session"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Synthesis voice override
    #[arg(long, global = true, value_name = "ID")]
    pub voice_id: Option<String>,

    /// Audio player program override (default: mpv)
    #[arg(long, global = true, value_name = "PROGRAM")]
    pub player: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Speak TEXT, or standard input line by line when TEXT is omitted
    Speak {
        /// Text to speak
        text: Option<String>,
    },

    /// Ask a language model and speak its answer while it streams
    #[cfg(feature = "llm")]
    Ask {
        /// Prompt sent to the model
        query: String,
    },

    /// Show which part of SENT remains after the service confirmed RECEIVED
    Resync {
        /// Text that was sent to the session
        #[arg(long)]
        sent: String,

        /// Characters the service confirmed, as one string, starting with its
        /// leading artifact
        #[arg(long)]
        received: String,

        /// Maximum displacement per character (default: from config)
        #[arg(long, value_name = "N")]
        tolerance: Option<usize>,
    },

    /// Check player, credentials and configuration
    Check,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Dump {
        /// Print built-in defaults instead of the loaded configuration
        #[arg(long)]
        defaults: bool,
    },
    /// Print the default configuration file path
    Path,
}

impl Cli {
    /// Log filter directive implied by -q / -v.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
