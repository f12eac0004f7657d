use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

use crate::classify::DkimMode;

#[derive(Parser, Debug)]
#[command(
    name = "dmarc-stats",
    about = "Break down DMARC aggregate report failures by cause and sender domain",
    version,
    long_about = None
)]
pub struct Args {
    /// JSON file holding an array of parsed aggregate reports
    pub aggregate_file_path: PathBuf,

    /// Ignore reports ending on or before this date (YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<NaiveDate>,

    /// Write daily totals to this CSV file
    #[arg(long)]
    pub output_stats_csv: Option<PathBuf>,

    /// Write the final counters to this JSON file
    #[arg(long)]
    pub output_json: Option<PathBuf>,

    /// How DKIM failures are broken down
    #[arg(long, value_enum, default_value_t = DkimMode::Detailed)]
    pub dkim_mode: DkimMode,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
