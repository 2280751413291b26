//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `metascreen_core` linkage and configuration loading.
//! - Optionally dry-run CSV ingestion without touching a database.
//!
//! Usage: `metascreen_cli [config.toml] [citations.csv]`

use metascreen_core::ingest::read_csv_batch;
use metascreen_core::ScreeningConfig;
use std::fs::File;
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("metascreen_core ping={}", metascreen_core::ping());
    println!("metascreen_core version={}", metascreen_core::core_version());

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => match ScreeningConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("config error: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => ScreeningConfig::default(),
    };
    println!(
        "ranking min_labeled={} timeout_ms={} batch_size={}",
        config.ranking.min_labeled, config.ranking.timeout_ms, config.ranking.batch_size
    );
    println!("highlight keywords={}", config.highlight.keywords.len());
    println!("auth reset_token_ttl_secs={}", config.auth.reset_token_ttl_secs);

    if let Some(path) = args.next() {
        let batch = match File::open(&path).map(read_csv_batch) {
            Ok(Ok(batch)) => batch,
            Ok(Err(err)) => {
                eprintln!("ingest error: {err}");
                return ExitCode::FAILURE;
            }
            Err(err) => {
                eprintln!("cannot open `{path}`: {err}");
                return ExitCode::FAILURE;
            }
        };
        println!(
            "ingest drafts={} malformed={}",
            batch.drafts.len(),
            batch.malformed.len()
        );
    }

    ExitCode::SUCCESS
}
