//! geocorr - Geographic table correlation and regression
//!
//! Runs one analysis described by a JSON config and prints its tables and results.

use anyhow::{Context, Result};
use clap::Parser;
use geocorr::pipeline::format_r2;
use geocorr::{AnalysisConfig, AnalysisOutcome, AnalysisPipeline};
use std::path::PathBuf;

/// Correlate and regress quantities aggregated per geographic unit
#[derive(Parser)]
#[command(name = "geocorr")]
#[command(version, about)]
struct Args {
    /// Path to the analysis config (JSON)
    config: PathBuf,

    /// Directory for PNG dashboards (overrides the config)
    #[arg(long)]
    chart_dir: Option<PathBuf>,

    /// Path of the JSON report (overrides the config)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print every row of each table
    #[arg(long)]
    all_rows: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = AnalysisConfig::from_file(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if args.chart_dir.is_some() {
        config.output.chart_dir = args.chart_dir;
    }
    if args.report.is_some() {
        config.output.report_path = args.report;
    }
    config.output.print_all_rows |= args.all_rows;

    if config.output.print_all_rows {
        std::env::set_var("POLARS_FMT_MAX_ROWS", "-1");
    }

    let pipeline = AnalysisPipeline::new(config);
    let outcome = pipeline.run()?;
    print_outcome(&pipeline, &outcome);

    let output = &pipeline.config().output;
    if let Some(dir) = &output.chart_dir {
        for path in pipeline.render_charts(&outcome, dir)? {
            println!("Chart: {}", path.display());
        }
    }
    if let Some(path) = &output.report_path {
        pipeline.write_report(&outcome, path)?;
    }
    Ok(())
}

fn print_outcome(pipeline: &AnalysisPipeline, outcome: &AnalysisOutcome) {
    println!("== {} ==", pipeline.config().title);
    println!("Primary table:\n{}", outcome.primary);
    if let Some(secondary) = &outcome.secondary {
        println!("Secondary table:\n{secondary}");
    }
    if outcome.joined.is_some() || !pipeline.config().trims.is_empty() {
        println!("Analysed table:\n{}", outcome.analysed);
    }

    if let Some(correlation) = &outcome.correlation {
        println!("Correlation:");
        for (group, c) in correlation.as_map() {
            println!("  {group}: {c}");
        }
    }

    for (column, summary) in &outcome.summaries {
        println!(
            "{column}: n={} mean={:.2} median={:.2} std={:.2} min={:.2} max={:.2}",
            summary.count, summary.mean, summary.median, summary.std, summary.min, summary.max
        );
    }

    if let Some(regression) = &outcome.regression {
        let report = &regression.report;
        println!(
            "Regression: slope={:.4} (per std of x) intercept={:.4} R²={} train={} test={}",
            report.model.slope,
            report.model.intercept,
            format_r2(report.r2),
            report.train_rows,
            report.test_x.len()
        );
        for (x, predicted) in &regression.scenarios {
            println!("  predict({x}) = {predicted:.2}");
        }
    }
}
