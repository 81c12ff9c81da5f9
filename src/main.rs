use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trivy_harvester::config::HarvesterConfig;
use trivy_harvester::executor::{resolve_template, TrivyExecutor};
use trivy_harvester::harvest::discovery::{self, PackageDiscovery};
use trivy_harvester::harvest::{Enhancer, LockfileSynthesizer, ScanPipeline};
use trivy_harvester::model::{OutputFormat, ScanTarget, ScanType};
use trivy_harvester::report::{run_folder_name, BatchReport};
use trivy_harvester::traits::ScanBackend;

/// Lockfile synthesis and Trivy scan orchestration for npm artifacts
#[derive(Parser, Debug)]
#[command(name = "trivy-harvester", version, about)]
struct Cli {
    /// Debug logging and scanner output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize package-lock.json files for unlocked packages under a directory
    Enhance {
        /// Directory to search for package.json files
        directory: PathBuf,
    },
    /// Scan archives or directories with Trivy
    Scan(ScanArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Report output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Report format: json, table, sarif or html
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Scan type: fs or image
    #[arg(short = 't', long = "type")]
    scan_type: Option<ScanType>,

    /// HTML template (defaults to the scanner's contrib templates)
    #[arg(long)]
    template: Option<PathBuf>,

    /// Keep extracted archives
    #[arg(long)]
    no_cleanup: bool,

    /// Do not synthesize lockfiles before scanning
    #[arg(long)]
    no_enhance: bool,

    /// Skip the companion JSON scan for non-JSON formats
    #[arg(long)]
    no_analysis: bool,

    /// Stop at the first failed artifact
    #[arg(long)]
    fail_fast: bool,

    /// Expand directory targets into the archives they contain
    #[arg(long)]
    find_archives: bool,

    /// Write reports straight into the output directory instead of a
    /// per-run `scan_reports_<timestamp>` folder
    #[arg(long)]
    flat_output: bool,

    /// Trivy installation folder
    scanner_folder: PathBuf,

    /// Archives, directories or files to scan
    #[arg(required = true)]
    targets: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.verbose);

    let outcome = run(cli).await;
    if let Err(e) = &outcome {
        error!("{e:#}");
    }
    ExitCode::from(exit_status(&outcome))
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "trivy_harvester=debug"
    } else {
        "trivy_harvester=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(cli: Cli) -> Result<u8> {
    let config = HarvesterConfig::from_env()?;
    match cli.command {
        Commands::Enhance { directory } => enhance(directory, config).await,
        Commands::Scan(args) => scan(args, cli.verbose, config).await,
    }
}

/// Any error exits 1; otherwise the batch decides.
fn exit_status(outcome: &Result<u8>) -> u8 {
    match outcome {
        Ok(code) => *code,
        Err(_) => 1,
    }
}

async fn enhance(directory: PathBuf, config: HarvesterConfig) -> Result<u8> {
    if !directory.is_dir() {
        bail!("Directory not found: {}", directory.display());
    }

    let enhancer = Enhancer::new(
        PackageDiscovery::workspace(config.max_packages),
        LockfileSynthesizer::new(config.max_dependencies),
    );
    let summary = tokio::task::spawn_blocking(move || enhancer.enhance(&directory))
        .await
        .context("enhancement task failed")?;

    info!(
        enhanced = summary.enhanced,
        already_locked = summary.already_locked,
        failed = summary.failed,
        "Done"
    );
    Ok(0)
}

/// Command-line flags win over the environment.
fn apply_scan_args(config: &mut HarvesterConfig, args: &ScanArgs) -> Result<()> {
    config.install_dir = Some(args.scanner_folder.clone());
    if let Some(dir) = &args.output {
        config.output_dir = dir.clone();
    }
    if let Some(format) = args.format {
        config.format = format;
    }
    if let Some(scan_type) = args.scan_type {
        config.scan_type = scan_type;
    }
    if args.template.is_some() {
        config.template = args.template.clone();
    }
    config.cleanup &= !args.no_cleanup;
    config.enhance &= !args.no_enhance;
    config.companion_json &= !args.no_analysis;
    config.fail_fast |= args.fail_fast;
    config.run_folder &= !args.flat_output;
    config.validate()?;
    Ok(())
}

/// Resolves command-line paths into scan targets.
///
/// With `find_archives`, a directory stands for the archives below it.
fn expand_targets(paths: &[PathBuf], find_archives: bool) -> Result<Vec<ScanTarget>> {
    let mut targets = Vec::new();
    for path in paths {
        if !path.exists() {
            bail!("Target not found: {}", path.display());
        }
        if find_archives && path.is_dir() {
            let found = discovery::find_archives(path);
            if found.is_empty() {
                warn!(dir = %path.display(), "No supported archives found");
            }
            targets.extend(found.into_iter().map(ScanTarget::archive));
        } else {
            targets.push(ScanTarget::from_path(path));
        }
    }
    Ok(targets)
}

async fn scan(args: ScanArgs, verbose: bool, mut config: HarvesterConfig) -> Result<u8> {
    apply_scan_args(&mut config, &args)?;
    let targets = expand_targets(&args.targets, args.find_archives)?;

    let install_dir = args.scanner_folder.clone();
    let executor = TrivyExecutor::from_install_dir(&install_dir)?
        .with_proxy(config.proxy.clone())
        .with_quiet(!verbose);
    match executor.version().await {
        Some(version) => info!(binary = %executor.binary().display(), %version, "Scanner found"),
        None => warn!(binary = %executor.binary().display(), "Scanner version unknown"),
    }

    if config.format == OutputFormat::Html {
        let template = resolve_template(config.template.as_deref(), &install_dir)?;
        info!(template = %template.display(), "Using HTML template");
        config.template = Some(template);
    }

    if config.run_folder {
        config.output_dir = config.output_dir.join(run_folder_name(Utc::now()));
    }
    let fail_fast = config.fail_fast;
    let output_dir = config.output_dir.clone();
    info!(output_dir = %output_dir.display(), "Writing reports");

    let pipeline = ScanPipeline::new(executor, config);
    let report = pipeline.run_batch(&targets).await;

    report.log_summary();
    write_summaries(&report, &output_dir);

    Ok(report.exit_code(fail_fast) as u8)
}

fn write_summaries(report: &BatchReport, output_dir: &Path) {
    match report.write_json(output_dir) {
        Ok(path) => info!(path = %path.display(), "Summary written"),
        Err(e) => warn!(error = %e, "Could not write summary"),
    }
    match report.write_csv(output_dir) {
        Ok(paths) => {
            for path in paths {
                info!(path = %path.display(), "CSV export written");
            }
        }
        Err(e) => warn!(error = %e, "Could not write CSV exports"),
    }
}
