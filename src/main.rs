//! consulator binary entry point.

use std::io::{Stderr, Stdout};

use anyhow::Result;
use clap::{CommandFactory, Parser, error::ErrorKind};
use tracing::{debug, info, warn};

use consulator::cli::Cli;
use consulator::console::Console;
use consulator::config::{ConfigLoader, ConfigPaths, Settings};
use consulator::error::{EXIT_FAILURE, EXIT_USAGE, Error};
use consulator::export::{self, DumpTarget};
use consulator::flatten::FlatMap;
use consulator::ingest::{Ingestor, Input};
use consulator::keys;
use consulator::logging::{self, LogTarget};
use consulator::sync::{self, consul::ConsulClient};

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(EXIT_USAGE);
        }
    };

    if let Err(e) = logging::init(cli.verbosity(), &LogTarget::parse(&cli.log)) {
        eprintln!("Error: failed to initialise logging: {e:#}");
        std::process::exit(EXIT_FAILURE);
    }

    if let Err(e) = run(cli).await {
        let code = match e.downcast_ref::<Error>() {
            Some(err) if err.is_usage() => {
                eprintln!("{err}\n\n{}", Cli::command().render_usage());
                EXIT_USAGE
            }
            Some(err) => {
                eprintln!("Error: {err}");
                err.exit_code()
            }
            None => {
                eprintln!("Error: {e:#}");
                EXIT_FAILURE
            }
        };
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut paths = ConfigPaths::discover();
    if let Some(ref explicit) = cli.config {
        paths = paths.with_explicit(explicit);
    }
    let loader = ConfigLoader::load_with_paths(paths)?;
    for file in loader.loaded_files() {
        debug!(path = %file.display(), "Using config file");
    }
    let mut settings = loader.into_settings();
    cli.apply_to(&mut settings);
    if settings.dry_run_ignored() {
        warn!("--dry-run only applies together with --sync; nothing will be planned");
    }

    let input = Input::from_args(&cli.paths, cli.format.as_deref())?;
    let local = load(&input, &settings)?;

    let mut console = Console::stdio();
    if settings.dump {
        let bytes = export::to_json(&export::export(&local))?;
        let target = DumpTarget {
            output: settings.output.as_deref(),
            gzip: settings.gzip,
        };
        console.dump(&target, &bytes)?;
    }

    if settings.sync {
        run_sync(&local, &settings, &mut console).await?;
    }

    Ok(())
}

fn load(input: &Input, settings: &Settings) -> Result<FlatMap> {
    let ingestor = Ingestor::new(&settings.prefix, &settings.glue);
    let mut local = FlatMap::new();

    let report = match input {
        Input::Path(path) => ingestor.load_path(path, &mut local)?,
        Input::Stdin(format) => ingestor.load_reader(std::io::stdin().lock(), *format, &mut local)?,
    };

    info!(
        keys = local.len(),
        files = report.files,
        dropped = report.dropped,
        "Found {} keys",
        local.len()
    );
    if !local.collisions().is_empty() {
        warn!(count = local.collisions().len(), "Keys were overwritten by later values");
    }
    if !local.rejected().is_empty() {
        warn!(count = local.rejected().len(), "Values without a key were skipped");
    }
    Ok(local)
}

async fn run_sync(local: &FlatMap, settings: &Settings, console: &mut Console<Stdout, Stderr>) -> Result<()> {
    let prefix = keys::prefix_path(&settings.prefix);
    if prefix.is_empty() {
        warn!("No prefix given, the whole key-value store will be reconciled");
    }

    let client = ConsulClient::from_env().map_err(Error::from)?;
    info!(address = %client.base_url(), prefix = %prefix, "Syncing to Consul");

    if settings.dry_run {
        let remote = sync::fetch_snapshot(&client, &prefix).await.map_err(Error::from)?;
        let plan = sync::reconcile(local, &remote);
        console.report(&plan)?;
        return Ok(());
    }

    let (plan, applied) = sync::sync(local, &client, &prefix, settings.concurrency)
        .await
        .map_err(Error::from)?;
    if plan.is_empty() {
        info!(unchanged = plan.unchanged.len(), "Already in sync");
    }
    console.report(format_args!("Sync: {applied}\n"))?;

    if !applied.is_success() {
        return Err(Error::Sync {
            attempted: applied.attempted(),
            failed: applied.failed(),
        }
        .into());
    }
    Ok(())
}
