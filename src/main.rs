//! fleetreport CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use fleetreport::cluster::local::LocalCluster;
use fleetreport::config::cli::Cli;
use fleetreport::config::{toml, validator, Config};
use fleetreport::model::{Report, UnitId};
use fleetreport::node::ReportNode;
use fleetreport::planner::ShardPlanner;
use fleetreport::plugins::{PluginSet, UnitCounter};
use fleetreport::source::UnitSource;
use fleetreport::synthetic::{RowCountAnalyzer, SyntheticTenants};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = build_config(&cli)?;
    validator::validate_config(&config).context("Configuration validation failed")?;

    init_logging(config.logging.debug);

    println!("fleetreport v{}", env!("CARGO_PKG_VERSION"));
    println!();
    print!("{}", config);

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    if cli.dry_run {
        return runtime.block_on(dry_run(&config));
    }

    println!();
    println!("Starting job...");
    println!();

    runtime.block_on(run(config))
}

/// Load the config file if given, then apply CLI overrides
fn build_config(cli: &Cli) -> Result<Config> {
    let base = match cli.config {
        Some(ref path) => toml::parse_toml_file(path)?,
        None => Config::default(),
    };
    toml::merge_cli_with_config(cli, base)
}

fn init_logging(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// Print the shard plan without starting anything
async fn dry_run(config: &Config) -> Result<()> {
    let tenants = Arc::new(SyntheticTenants::new(&config.synthetic));
    let units: Vec<UnitId> = tenants
        .list_all_unit_ids()
        .await
        .context("Failed to list units")?;
    let shards = ShardPlanner::new(tenants).plan(&units);

    println!();
    println!("Shard plan: {} units in {} shards", units.len(), shards.len());
    for (index, shard) in shards.iter().enumerate() {
        let first = shard.units.first().map(|u| u.as_str()).unwrap_or("-");
        let last = shard.units.last().map(|u| u.as_str()).unwrap_or("-");
        println!("  shard {:>4}: {:>3} units  {} .. {}", index, shard.len(), first, last);
    }
    println!();
    println!("Dry run mode - configuration validated successfully");
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let started = Instant::now();
    let cluster = LocalCluster::new();
    let tenants = Arc::new(SyntheticTenants::new(&config.synthetic));
    let plugins = PluginSet::new()
        .with_analyzer(Arc::new(RowCountAnalyzer::new(&config.synthetic.failing_units)))
        .with_cumulator(Arc::new(UnitCounter));

    let nodes = (0..config.cluster.members)
        .map(|_| {
            ReportNode::join(
                &cluster,
                tenants.clone(),
                tenants.clone(),
                plugins.clone(),
                config.cluster.scheduler.build(config.cluster.seed),
                &config.coordinator,
            )
        })
        .collect::<fleetreport::Result<Vec<_>>>()
        .context("Failed to build cluster")?;

    let coordinator = nodes[0].coordinator();
    let job_id = coordinator
        .start(&config.job_type)
        .await
        .with_context(|| format!("Failed to start job of type '{}'", config.job_type))?;

    let report = coordinator
        .wait_for_completion(
            &config.job_type,
            &job_id,
            POLL_INTERVAL,
            Duration::from_secs(config.output.wait_timeout_secs),
        )
        .await?;
    cluster.wait_idle().await;

    let Some(report) = report else {
        anyhow::bail!(
            "Job {} did not complete (aborted or timed out after {}s)",
            job_id,
            config.output.wait_timeout_secs
        );
    };

    print_summary(&report, started.elapsed());

    if let Some(ref path) = config.output.json_output {
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!();
        println!("Report written to {}", path.display());
    }

    Ok(())
}

fn print_summary(report: &Report, elapsed: Duration) {
    println!();
    println!("Job {} ({}) complete", report.id, report.job_type);
    println!("  Units:    {}", report.total_units);
    println!("  Errors:   {}", report.errors.len());
    println!("  Elapsed:  {:.3}s", elapsed.as_secs_f64());
    if let Some(units) = report.result.get("units") {
        println!("  Analyzed: {}", units);
    }
    if let Some(rows) = report.result.get("rows") {
        println!("  Rows:     {}", rows);
    }

    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &report.errors {
            let unit = error.unit.as_ref().map(|u| u.as_str()).unwrap_or("-");
            println!("  [{}] {} {}: {}", error.kind, unit, error.origin, error.message);
        }
    }
}
