mod config;
mod sink;

use anyhow::{Context, Result};
use ciwatch_core::{aggregate, BuildSource, Report, ResultTable, Taxonomy};
use ciwatch_jenkins::{JenkinsConfig, JenkinsSource};
use ciwatch_reconcile::{ReconcileConfig, ReconcileEngine, ReconcileSummary};
use ciwatch_storage::BuildCacheStore;
use clap::{Args, Parser, Subcommand};
use config::{JenkinsSettings, JobsConfig};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ciwatch")]
#[command(about = "Reconcile executor sub-builds into a per-subcomponent test report", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the executor history and write the report for the target build
    Report(ReportArgs),
    /// List the builds cached for the executor job
    Cache(CommonArgs),
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    #[arg(long, env = "CIWATCH_JENKINS_CONFIG", default_value = "jenkins.cfg")]
    jenkins_config: PathBuf,
    #[arg(long, env = "CIWATCH_CACHE_DIR", default_value = ".")]
    cache_dir: PathBuf,
    #[arg(long, env = "CIWATCH_DEBUG", default_value_t = false)]
    debug: bool,
}

#[derive(Args, Debug, Clone)]
struct ReportArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, env = "CIWATCH_JOBS_CONFIG", default_value = "jobs.cfg")]
    jobs_config: PathBuf,
    #[arg(long, env = "CIWATCH_REPORT_DIR", default_value = "data")]
    report_dir: PathBuf,
    /// Executor build to report on, instead of `[JOBS] build`
    #[arg(long, env = "CIWATCH_BUILD")]
    build: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Report(args) => {
            init_logging(args.common.debug);
            run_report(&args)
        }
        Commands::Cache(args) => {
            init_logging(args.debug);
            list_cache(&args)
        }
    }
}

fn init_logging(debug: bool) {
    let level = log_level(debug, std::env::var("CIWATCH_LOG_LEVEL").ok());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// `--debug` beats `CIWATCH_LOG_LEVEL`; `RUST_LOG` beats both when the filter is built.
fn log_level(debug: bool, env_level: Option<String>) -> String {
    if debug {
        return "debug".to_string();
    }
    env_level
        .map(|level| level.trim().to_string())
        .filter(|level| !level.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

fn run_report(args: &ReportArgs) -> Result<()> {
    info!("Reading jenkins and jobs config files");
    let settings = JenkinsSettings::load(&args.common.jenkins_config)?;
    let jobs = JobsConfig::load(&args.jobs_config)?;
    let taxonomy = Taxonomy::load(&jobs)
        .with_context(|| format!("Invalid taxonomy in {}", args.jobs_config.display()))?;
    if taxonomy.is_empty() {
        warn!(
            path = %args.jobs_config.display(),
            "taxonomy declares no subcomponents; the report will have no pass percentage"
        );
    }

    let target_build = resolve_target_build(args.build.as_deref(), &settings)?;

    let source = JenkinsSource::new(JenkinsConfig {
        base_url: settings.base_url.clone(),
        timeout: settings.timeout,
    })
    .context("Failed to build the Jenkins client")?;

    let paths = RunPaths {
        cache_file: BuildCacheStore::path_for_job(&args.common.cache_dir, &settings.executor_job),
        report_file: sink::report_path(&args.report_dir, &target_build),
    };
    let report = reconcile_and_report(
        &source,
        &taxonomy,
        ReconcileConfig {
            job: settings.executor_job.clone(),
            target_build,
        },
        &paths,
    )?;
    sink::log_report(&report);
    Ok(())
}

fn resolve_target_build(flag: Option<&str>, settings: &JenkinsSettings) -> Result<String> {
    match flag.map(str::trim).filter(|build| !build.is_empty()) {
        Some(build) => Ok(config::validate_build_id(build)?),
        None => Ok(settings.target_build.clone()),
    }
}

struct RunPaths {
    cache_file: PathBuf,
    report_file: PathBuf,
}

/// One full run: reconcile, persist the cache, aggregate and write the CSV.
fn reconcile_and_report<S: BuildSource>(
    source: S,
    taxonomy: &Taxonomy,
    config: ReconcileConfig,
    paths: &RunPaths,
) -> Result<Report> {
    let mut cache = BuildCacheStore::open(&paths.cache_file)
        .with_context(|| format!("Failed to load cache {}", paths.cache_file.display()))?;
    let mut results = ResultTable::seed(taxonomy);

    info!("Fetching executor jobs. This might take few minutes...");
    let engine = ReconcileEngine::new(source, config);
    let summary = engine
        .reconcile(&mut cache, &mut results)
        .with_context(|| format!("Reconciling {} failed", engine.config().job))?;
    log_summary(&summary);

    info!("Saving jenkins executor results in cache");
    cache
        .save()
        .with_context(|| format!("Failed to save cache {}", paths.cache_file.display()))?;

    info!("Preparing report..");
    let report = aggregate(&results).context("Cannot compute pass percentage")?;
    sink::write_csv(&paths.report_file, &report)
        .with_context(|| format!("Failed to write {}", paths.report_file.display()))?;
    info!(path = %paths.report_file.display(), "wrote report");
    Ok(report)
}

fn log_summary(summary: &ReconcileSummary) {
    info!(
        builds = summary.builds_seen,
        cached = summary.served_from_cache,
        fetched = summary.fetched_live,
        newly_cached = summary.newly_cached,
        running = summary.running,
        applied = summary.applied,
        "reconciliation finished"
    );
    if summary.parse_failures + summary.taxonomy_misses > 0 {
        info!(
            parse_failures = summary.parse_failures,
            taxonomy_misses = summary.taxonomy_misses,
            "some builds could not be matched"
        );
    }
}

fn list_cache(args: &CommonArgs) -> Result<()> {
    let settings = JenkinsSettings::load(&args.jenkins_config)?;
    let path = BuildCacheStore::path_for_job(&args.cache_dir, &settings.executor_job);
    let cache = BuildCacheStore::open(&path)
        .with_context(|| format!("Failed to load cache {}", path.display()))?;
    print_cache(&cache, &path);
    Ok(())
}

fn print_cache(cache: &BuildCacheStore, path: &Path) {
    if cache.is_empty() {
        println!("No cached builds in {}", path.display());
        return;
    }
    println!("{} cached builds in {}:", cache.len(), path.display());
    for (number, entry) in cache.entries() {
        println!("- #{number} [{}] {}", entry.run_status, entry.description);
    }
}
