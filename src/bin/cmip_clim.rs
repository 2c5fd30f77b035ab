use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cmip_climatology::catalog::{
    CatalogClient, DEFAULT_LOCATOR_COLUMN, EsmCatalogClient, StaticCatalog,
};
use cmip_climatology::config::{ConfigLoader, ResolvedConfig};
use cmip_climatology::domain::{FacetFilter, YearWindow};
use cmip_climatology::error::ClimError;
use cmip_climatology::executor::{FailurePolicy, GraphExecutor};
use cmip_climatology::output::{ClimatologyJson, JsonOutput, LogSink};
use cmip_climatology::pipeline::Pipeline;
use cmip_climatology::snapshot::SnapshotStore;
use cmip_climatology::zarr::ZarrStore;

#[derive(Parser)]
#[command(name = "cmip-clim")]
#[command(about = "Multi-model climatologies from CMIP catalogs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Compute the merged climatology for a query and year window")]
    Run(RunArgs),
    #[command(about = "List catalog rows matching a query, grouped by model and experiment")]
    Search(QueryArgs),
}

#[derive(Args, Clone)]
struct QueryArgs {
    #[arg(long)]
    config: Option<String>,

    /// Facet filter `name=value[,value...]`; replaces the config's values for that facet.
    #[arg(long = "facet", value_name = "NAME=VALUES")]
    facets: Vec<FacetFilter>,

    /// ESM collection JSON URL.
    #[arg(long)]
    catalog: Option<String>,

    /// Read the catalog table from a local CSV (optionally gzipped) instead.
    #[arg(long)]
    catalog_csv: Option<PathBuf>,

    #[arg(long)]
    no_snapshot: bool,

    /// Drop cached catalog snapshots so the table is downloaded again.
    #[arg(long)]
    refresh_catalog: bool,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    query: QueryArgs,

    #[arg(long)]
    years: Option<YearWindow>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    skip_failed: bool,

    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(clim) = report.downcast_ref::<ClimError>() {
            return ExitCode::from(map_exit_code(clim));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ClimError) -> u8 {
    match error {
        ClimError::InvalidQuery(_)
        | ClimError::InvalidYearWindow { .. }
        | ClimError::NoMatchingDatasets(_)
        | ClimError::MultipleMatch { .. }
        | ClimError::MissingConfig
        | ClimError::ConfigRead(_)
        | ClimError::ConfigParse(_) => 2,
        ClimError::CatalogUnavailable(_) | ClimError::Store(_) | ClimError::DatasetOpen { .. } => 3,
        ClimError::MalformedDataset(_)
        | ClimError::UnsupportedCalendar(_)
        | ClimError::TimeDecode(_)
        | ClimError::MissingTimeAxis(_)
        | ClimError::EmptyWindow { .. }
        | ClimError::Concatenation { .. }
        | ClimError::Merge(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => {
            let mut resolved = resolve(&args.query)?;
            if let Some(years) = args.years {
                resolved.window = Some(years);
            }
            if let Some(workers) = args.workers {
                resolved.execution.workers = workers.max(1);
            }
            if args.skip_failed {
                resolved.execution.policy = FailurePolicy::SkipFailed;
            }
            match &args.query.catalog_csv {
                Some(path) => run_climatology(
                    StaticCatalog::from_csv_path(path, DEFAULT_LOCATOR_COLUMN)?,
                    &resolved,
                    &args,
                ),
                None => run_climatology(
                    esm_catalog(&resolved, args.query.refresh_catalog)?,
                    &resolved,
                    &args,
                ),
            }
        }
        Commands::Search(args) => {
            let resolved = resolve(&args)?;
            match &args.catalog_csv {
                Some(path) => run_search(
                    StaticCatalog::from_csv_path(path, DEFAULT_LOCATOR_COLUMN)?,
                    &resolved,
                ),
                None => run_search(esm_catalog(&resolved, args.refresh_catalog)?, &resolved),
            }
        }
    }
}

fn resolve(args: &QueryArgs) -> Result<ResolvedConfig, ClimError> {
    let mut resolved = ConfigLoader::resolve_or_default(args.config.as_deref())?;
    for facet in &args.facets {
        resolved.query.set_facet(&facet.name, facet.values.iter().cloned());
    }
    if let Some(catalog) = &args.catalog {
        resolved.catalog_url = catalog.clone();
    }
    if args.no_snapshot {
        resolved.use_snapshot = false;
    }
    Ok(resolved)
}

fn esm_catalog(resolved: &ResolvedConfig, refresh: bool) -> Result<EsmCatalogClient, ClimError> {
    let client = EsmCatalogClient::new(&resolved.catalog_url, resolved.execution.timeout)?;
    if !resolved.use_snapshot {
        return Ok(client);
    }
    let snapshots = SnapshotStore::new()?;
    if refresh {
        snapshots.clear()?;
        tracing::info!(root = %snapshots.root(), "cleared catalog snapshots");
    }
    Ok(client.with_snapshot(snapshots))
}

fn pipeline<C: CatalogClient>(
    catalog: C,
    resolved: &ResolvedConfig,
) -> Result<Pipeline<C, ZarrStore>, ClimError> {
    let store = ZarrStore::new();
    let executor = GraphExecutor::new(resolved.execution.workers, resolved.execution.policy)?;
    Ok(Pipeline::new(catalog, store, executor))
}

fn run_climatology<C: CatalogClient>(
    catalog: C,
    resolved: &ResolvedConfig,
    args: &RunArgs,
) -> miette::Result<()> {
    let request = resolved.request()?;
    let pipeline = pipeline(catalog, resolved)?;
    let output = pipeline.run(&request, &LogSink)?;
    for excluded in &output.excluded {
        tracing::warn!(stage = %excluded.stage, key = %excluded.key, "excluded: {}", excluded.reason);
    }
    let json = ClimatologyJson::new(&output.climatology, &output.excluded);
    match &args.output {
        Some(path) => {
            JsonOutput::write_climatology(path, &json)?;
            tracing::info!(path = %path.display(), "climatology written");
            Ok(())
        }
        None => JsonOutput::print_climatology(&json).into_diagnostic(),
    }
}

fn run_search<C: CatalogClient>(catalog: C, resolved: &ResolvedConfig) -> miette::Result<()> {
    resolved.query.validate()?;
    let pipeline = pipeline(catalog, resolved)?;
    let result = pipeline.search(&resolved.query, &LogSink)?;
    JsonOutput::print_search(&result).into_diagnostic()
}
