//! `codemap` — batch runner for the vocabulary mapping pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use codemap_core::{
    known_keys, validate_all, CancellationToken, CodeStore, CodemapError, DataPaths, Pipeline,
    PipelineOptions, ResolutionConfig,
};

const EXIT_FAILURE: u8 = 1;
const EXIT_VALIDATION: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "codemap",
    about = "Load medical vocabularies, build cross-system mappings, and resolve conflicts",
    version
)]
struct Args {
    /// Staging directory holding one subdirectory per vocabulary
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Path to the SQLite database
    #[arg(long, default_value = "codemap.db")]
    db: PathBuf,

    /// Run only these loader/mapper keys (repeatable)
    #[arg(long, conflicts_with = "skip")]
    only: Vec<String>,

    /// Skip these loader/mapper keys (repeatable)
    #[arg(long)]
    skip: Vec<String>,

    /// Abort the run on any validation or component failure
    #[arg(long)]
    strict: bool,

    /// Run source validation and exit without touching the store
    #[arg(long)]
    validate: bool,

    /// Wipe the store before running
    #[arg(long)]
    clean: bool,

    /// Run the conflict resolution pass after mapping
    #[arg(long)]
    auto_resolve: bool,

    /// Cap the number of conflicts processed by the resolution pass
    #[arg(long)]
    resolve_limit: Option<usize>,

    /// Minimum similarity for a fuzzy match (0.0-1.0)
    #[arg(
        long,
        default_value_t = ResolutionConfig::DEFAULT_FUZZY_THRESHOLD,
        value_parser = parse_fuzzy_threshold
    )]
    fuzzy_threshold: f64,

    /// Allow the resolution pass to create inactive placeholder codes
    #[arg(long)]
    create_placeholders: bool,

    /// Compute resolution outcomes without persisting them
    #[arg(long)]
    dry_run: bool,

    /// List the available loader/mapper keys and exit
    #[arg(long)]
    list: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn parse_fuzzy_threshold(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("not a number: {}", e))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err("must be between 0.0 and 1.0".into())
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: failed to set up logging");
    }

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            if e.downcast_ref::<CodemapError>()
                .is_some_and(|err| matches!(err, CodemapError::ValidationFailed { .. }))
            {
                ExitCode::from(EXIT_VALIDATION)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    if args.list {
        println!("Available keys:");
        for key in known_keys() {
            println!("  {}", key);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let paths = DataPaths::new(args.data_dir.clone());

    if args.validate {
        let reports = validate_all(&paths);
        let mut failed = 0;
        for report in &reports {
            if report.passed {
                println!("ok   {}", report.key);
            } else {
                failed += 1;
                println!("FAIL {}: {}", report.key, report.messages.join("; "));
            }
        }
        println!("{} passed, {} failed", reports.len() - failed, failed);
        return Ok(if failed > 0 && args.strict {
            ExitCode::from(EXIT_VALIDATION)
        } else {
            ExitCode::SUCCESS
        });
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            info!("Interrupt received, stopping after the current batch");
            cancel.cancel();
        })
        .context("Failed to install interrupt handler")?;
    }

    let store = CodeStore::open(&args.db)
        .with_context(|| format!("Failed to open store at {}", args.db.display()))?;

    let options = PipelineOptions {
        only: args.only,
        skip: args.skip,
        strict: args.strict,
        clean: args.clean,
        auto_resolve: args.auto_resolve,
        resolve_limit: args.resolve_limit,
        fuzzy_threshold: args.fuzzy_threshold,
        create_placeholders: args.create_placeholders,
        dry_run: args.dry_run,
    };

    let pipeline = Pipeline::new(&store, paths, options)?;
    let summary = pipeline.run(&cancel)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuzzy_threshold_must_be_a_ratio() {
        assert!(Args::try_parse_from(["codemap", "--fuzzy-threshold", "0.9"]).is_ok());
        assert!(Args::try_parse_from(["codemap", "--fuzzy-threshold", "1.0"]).is_ok());
        assert!(Args::try_parse_from(["codemap", "--fuzzy-threshold", "1.5"]).is_err());
        assert!(Args::try_parse_from(["codemap", "--fuzzy-threshold=-0.1"]).is_err());
        assert!(Args::try_parse_from(["codemap", "--fuzzy-threshold", "high"]).is_err());
    }
}
