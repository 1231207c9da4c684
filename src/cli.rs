//! Command-line surface of the triage tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::ArchiveFormat;
use crate::incident::IsolationLevel;
use crate::models::Severity;

#[derive(Parser, Debug)]
#[clap(
    name = "host-triage",
    about = "Incident-response host triage: collect, detect, package, verify"
)]
pub struct Args {
    /// Verbose logging
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Path to configuration YAML file
    #[clap(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a collection, detection and packaging pass on this host
    Collect {
        /// Output directory for the bundle (default: current directory)
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Include low-priority artifacts (priority 4 and 5)
        #[clap(long)]
        extended: bool,

        /// Collect only the named artifacts (repeatable)
        #[clap(long)]
        include: Vec<String>,

        /// Skip the named artifacts (repeatable)
        #[clap(long)]
        exclude: Vec<String>,

        /// Profile-wide timeout in seconds
        #[clap(long)]
        timeout: Option<u64>,

        /// Maximum concurrent collector tasks
        #[clap(long)]
        max_parallel: Option<usize>,

        /// Permit artifacts that reach out over the network
        #[clap(long)]
        allow_network: bool,

        /// Archive container for the bundle
        #[clap(long, value_enum)]
        format: Option<ArchiveFormatArg>,

        /// Load the artifact catalogue from a YAML file instead of the
        /// built-in tables
        #[clap(long)]
        catalogue: Option<PathBuf>,

        /// Use the deterministic mock collector instead of the host
        #[clap(long)]
        mock: bool,

        /// Merge results into this incident
        #[clap(long)]
        incident: Option<String>,
    },

    /// Recompute a bundle's hashes and report mismatches
    Verify {
        /// Staging directory or archive file
        bundle: PathBuf,
    },

    /// Manage incident contexts
    #[clap(subcommand)]
    Incident(IncidentCommands),

    /// Write a default configuration file
    InitConfig {
        #[clap(default_value = "host-triage.yaml")]
        path: PathBuf,
    },

    /// List the loaded detection rules
    Rules,
}

#[derive(Subcommand, Debug)]
pub enum IncidentCommands {
    /// Open a new incident
    Create {
        title: String,

        #[clap(long, default_value = "")]
        description: String,

        #[clap(long, default_value = "analyst")]
        analyst: String,

        #[clap(long, value_enum, default_value_t = SeverityArg::Medium)]
        severity: SeverityArg,

        /// Allow runs shared with other incidents (records the overlap)
        #[clap(long)]
        loose: bool,
    },

    /// List known incidents
    List,

    /// Print one incident as JSON
    Show { id: String },

    /// Make an incident the current one; collections without --incident
    /// merge into it
    Use { id: String },

    /// Print the current incident id, if any
    Current,

    /// Close an incident; closed incidents reject further writes
    Close { id: String },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ArchiveFormatArg {
    Zip,
    TarGz,
}

impl From<ArchiveFormatArg> for ArchiveFormat {
    fn from(arg: ArchiveFormatArg) -> Self {
        match arg {
            ArchiveFormatArg::Zip => ArchiveFormat::Zip,
            ArchiveFormatArg::TarGz => ArchiveFormat::TarGz,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SeverityArg {
    Low,
    Medium,
    High,
    Critical,
}

impl From<SeverityArg> for Severity {
    fn from(arg: SeverityArg) -> Self {
        match arg {
            SeverityArg::Low => Severity::Low,
            SeverityArg::Medium => Severity::Medium,
            SeverityArg::High => Severity::High,
            SeverityArg::Critical => Severity::Critical,
        }
    }
}

pub fn isolation_from_flag(loose: bool) -> IsolationLevel {
    if loose {
        IsolationLevel::Loose
    } else {
        IsolationLevel::Strict
    }
}
