use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{error, info};

use dmarc_stats::summary::{write_daily_csv, write_json};
use dmarc_stats::utils::{setup_logging, validate_args};
use dmarc_stats::{analyze_aggregate_file, Analysis, AnalysisOptions, Args, Summary};

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    Ok(BufWriter::new(file))
}

fn write_outputs(analysis: &Analysis, args: &Args) -> Result<()> {
    if let (Some(path), Some(daily)) = (&args.output_stats_csv, &analysis.daily) {
        write_daily_csv(daily, create_output(path)?)
            .with_context(|| format!("Failed to write daily stats to {:?}", path))?;
        info!(action = "write", component = "daily_csv", file_path = ?path, days = daily.len(), "Wrote daily stats");
    }

    if let Some(path) = &args.output_json {
        let mut writer = create_output(path)?;
        write_json(&analysis.results, analysis.daily.as_ref(), &mut writer)
            .with_context(|| format!("Failed to write JSON export to {:?}", path))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write JSON export to {:?}", path))?;
        info!(action = "write", component = "json_export", file_path = ?path, "Wrote JSON export");
    }

    Ok(())
}

fn run(args: &Args) -> Result<()> {
    validate_args(args)?;

    let options = AnalysisOptions {
        since: args.since,
        dkim_mode: args.dkim_mode,
        daily_stats: args.output_stats_csv.is_some(),
    };
    let analysis = analyze_aggregate_file(&args.aggregate_file_path, &options)?;

    print!("{}", Summary::build(&analysis.results));
    write_outputs(&analysis, args)
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
