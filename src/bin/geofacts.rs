use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use geofacts_harvester::app::Harvester;
use geofacts_harvester::config::{ConfigLoader, HarvestConfig, Overrides};
use geofacts_harvester::error::HarvestError;
use geofacts_harvester::fetch::{HttpTransport, RetryingFetcher};
use geofacts_harvester::output::{HumanOutput, JsonOutput, OutputMode};
use geofacts_harvester::reference::JsonEntitySource;
use geofacts_harvester::storage::FsObjectStore;

#[derive(Parser)]
#[command(name = "geofacts")]
#[command(about = "Resolve geographies against Census QuickFacts and download their fact tables")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    storage_root: Option<String>,

    #[arg(long, global = true)]
    prefix: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Resolve pending geographies and download fact tables")]
    Run(RunArgs),
    #[command(about = "Show checkpoint and storage counts")]
    Status,
    #[command(about = "Re-validate stored fact tables without network access")]
    Validate,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, help = "Storage key of the reference entities JSON")]
    reference: Option<String>,

    #[arg(long)]
    search_concurrency: Option<usize>,

    #[arg(long)]
    download_concurrency: Option<usize>,

    #[arg(long, help = "Do not download TIGER reference files before resolving")]
    skip_reference_files: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::ConfigValue(_)
        | HarvestError::Reference(_)
        | HarvestError::InvalidGeoid(_)
        | HarvestError::InvalidLevel(_)
        | HarvestError::MissingParentState { .. }
        | HarvestError::DuplicateEntity(_) => 2,
        HarvestError::Http(_) | HarvestError::HttpStatus { .. } => 3,
        HarvestError::MalformedResponse(_)
        | HarvestError::BatchTooLarge(_)
        | HarvestError::EmptyBatch => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let mut cli_overrides = Overrides {
        storage_root: cli.common.storage_root,
        dest_prefix: cli.common.prefix,
        ..Overrides::default()
    };
    if let Command::Run(args) = &cli.command {
        cli_overrides.reference_key = args.reference.clone();
        cli_overrides.search_concurrency = args.search_concurrency;
        cli_overrides.download_concurrency = args.download_concurrency;
        if args.skip_reference_files {
            cli_overrides.download_reference_files = Some(false);
        }
    }
    let overrides = Overrides::from_env()?.layered(cli_overrides);
    let config = ConfigLoader::resolve(cli.common.config.as_deref(), overrides)?;
    let harvester = build_harvester(config.clone())?;

    match cli.command {
        Command::Run(_) => {
            let source = JsonEntitySource::new(harvester.store(), config.reference_key.clone());
            let summary = harvester.run(&source)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_run(&summary).into_diagnostic()?,
                OutputMode::Human => HumanOutput::print_run(&summary),
            }
        }
        Command::Status => {
            let status = harvester.status()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_status(&status).into_diagnostic()?,
                OutputMode::Human => HumanOutput::print_status(&status),
            }
        }
        Command::Validate => {
            let result = harvester.validate_stored()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_validate(&result).into_diagnostic()?,
                OutputMode::Human => HumanOutput::print_validate(&result),
            }
        }
    }
    Ok(())
}

fn build_harvester(
    config: HarvestConfig,
) -> Result<Harvester<HttpTransport, FsObjectStore>, HarvestError> {
    let transport = HttpTransport::new(config.request_timeout)?;
    let fetcher = RetryingFetcher::new(transport, config.retry);
    let store = FsObjectStore::new(config.storage_root.clone());
    Ok(Harvester::new(fetcher, store, config))
}
