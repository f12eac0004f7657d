use std::io;

use time::macros::format_description;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

pub fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "info" } else { "warn" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LocalTime::new(format_description!(
            "[hour]:[minute]:[second].[subsecond digits:3]"
        )))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Suffix for a count noun: singular only for exactly one.
pub fn plural(count: u64) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// Descending by count, ties broken by ascending key.
pub fn sorted_by_count<I>(entries: I) -> Vec<(String, u64)>
where
    I: IntoIterator<Item = (String, u64)>,
{
    let mut sorted: Vec<(String, u64)> = entries.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

pub fn validate_args(args: &crate::args::Args) -> anyhow::Result<()> {
    for path in [&args.output_stats_csv, &args.output_json].into_iter().flatten() {
        if path.is_dir() {
            anyhow::bail!("{:?} is a directory, expected an output file path", path);
        }
    }

    if let (Some(csv), Some(json)) = (&args.output_stats_csv, &args.output_json) {
        if csv == json {
            anyhow::bail!("--output-stats-csv and --output-json must point to different files");
        }
    }

    Ok(())
}
