//! Command-line definition.
//!
//! Flags only override settings that are given; anything left unset falls
//! back to the configuration tiers.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Settings;
use crate::logging::Verbosity;

const ENV_HELP: &str = "\
PATH should be a file or directory containing your data. If no path is
provided, stdin is used and --format must be given.

The usual Consul client environment variables configure the connection:
 - CONSUL_HTTP_ADDR
 - CONSUL_HTTP_TOKEN
 - CONSUL_HTTP_SSL
 - CONSUL_HTTP_SSL_VERIFY";

/// Load JSON and YAML trees into Consul KV
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None, after_long_help = ENV_HELP)]
pub struct Cli {
    /// File or directory holding the data (stdin when omitted)
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Data format when reading from stdin: json or yaml
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Consul tree to work under
    #[arg(short, long)]
    pub prefix: Option<String>,

    /// Glue used when joining array values (default: newline)
    #[arg(short, long)]
    pub glue: Option<String>,

    /// Dump loaded data as JSON, suitable for `consul kv import`
    #[arg(long)]
    pub dump: bool,

    /// Sync to Consul
    #[arg(long)]
    pub sync: bool,

    /// With --sync, print the changes instead of applying them
    #[arg(long)]
    pub dry_run: bool,

    /// Write the dump to a file instead of stdout (.gz compresses)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Gzip the dump
    #[arg(long)]
    pub gzip: bool,

    /// Concurrent Consul requests while syncing
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show debugging information
    #[arg(long)]
    pub debug: bool,

    /// Show even more debugging information
    #[arg(long)]
    pub trace: bool,

    /// Only show errors
    #[arg(short, long, conflicts_with_all = ["debug", "trace"])]
    pub quiet: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2")]
    pub log: String,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.trace {
            Verbosity::Trace
        } else if self.debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }

    /// Apply the flags that were given on top of `settings`.
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(ref prefix) = self.prefix {
            settings.prefix = prefix.clone();
        }
        if let Some(ref glue) = self.glue {
            settings.glue = glue.clone();
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        if let Some(ref output) = self.output {
            settings.output = Some(output.clone());
        }
        settings.dump |= self.dump;
        settings.sync |= self.sync;
        settings.dry_run |= self.dry_run;
        settings.gzip |= self.gzip;
    }
}
