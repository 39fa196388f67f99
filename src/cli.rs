use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show failures
    Quiet,
    /// Show summaries
    #[default]
    Normal,
    /// Show every candidate and its findings
    Verbose,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
    Summary,
}

/// Validate XML metadata records against configurable rule sets
#[derive(Parser, Debug, Clone)]
#[command(name = "validate-metadata")]
#[command(
    about = "Harvest metadata records from CSW catalogs and web-accessible folders and validate them against rule sets"
)]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Rule catalog file (TOML or JSON)
    #[arg(long = "catalog", global = true)]
    pub catalog: Option<PathBuf>,

    /// Report store file
    #[arg(long = "store", global = true)]
    pub store: Option<PathBuf>,

    /// Number of documents validated concurrently
    #[arg(short = 't', long = "threads", global = true)]
    pub threads: Option<usize>,

    /// HTTP request timeout in seconds
    #[arg(long = "timeout", global = true)]
    pub timeout: Option<u64>,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, global = true)]
    pub output_format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Quiet mode (failures only)
    #[arg(
        short = 'q',
        long = "quiet",
        global = true,
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Harvest validation sets and record a report for every document found
    Harvest {
        /// Validation set ids to run (default: all, in catalog order)
        #[arg(long = "set")]
        sets: Vec<String>,
    },
    /// Validate documents against a rule set without recording history
    Validate {
        /// Rule set id
        #[arg(short = 'r', long = "ruleset")]
        ruleset: String,
        /// URLs, file:// URLs or local paths
        #[arg(required = true)]
        locations: Vec<String>,
    },
    /// List the documents a CSW or WAF seed URL resolves to
    Discover {
        seed: String,
    },
    /// Materialize every rule in the catalog and report configuration errors
    CheckRules,
    /// Show recorded jobs and their latest reports
    History {
        /// Only jobs of this validation set
        #[arg(long = "set")]
        set: Option<String>,
        /// Only failing jobs
        #[arg(long = "failed")]
        failed: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        if let Some(timeout) = self.timeout
            && timeout == 0
        {
            return Err("Timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}
