//! 🚀 bibdex-cli: the front door, the bouncer, the maitre d' of bibdex.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary is the thin wrapper that parses flags, loads config, sets up logging, wires
//! Ctrl-C to the cancellation token, and then lets the library do the heavy lifting.
//! Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use bibdex::app_config::load_config;
use bibdex::backends::{DumpSinkConfig, SinkConfig};
use bibdex::error::PipelineError;
use bibdex::pipeline::RunOptions;
use bibdex::store::Selection;
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 📚 Merge duplicate bibliographic records and push them into the search index.
#[derive(Debug, Parser)]
#[command(name = "bibdex-cli", version, about)]
struct Args {
    /// 🔧 TOML config file. Env vars (BIBDEX_*) are read either way.
    #[arg(long, env = "BIBDEX_CONFIG")]
    config: Option<PathBuf>,

    /// ⏱️ Only process work changed at or after this instant (RFC 3339). Skips the checkpoint.
    #[arg(long, value_parser = parse_instant)]
    from: Option<DateTime<Utc>>,

    /// ⏱️ Only process work changed at or before this instant (RFC 3339).
    #[arg(long, value_parser = parse_instant)]
    until: Option<DateTime<Utc>>,

    /// 🎯 Process only the record (or cluster) with this id.
    #[arg(long)]
    single_id: Option<String>,

    /// 🏷️ Process only records from this source.
    #[arg(long)]
    source: Option<String>,

    /// 🗑️ Remove this source from the index.
    #[arg(long)]
    delete_source: Option<String>,

    /// 🔁 Ignore the checkpoint and go through everything.
    #[arg(long)]
    full: bool,

    /// 📝 Write requests to numbered files with this prefix instead of sending them.
    #[arg(long)]
    dump_prefix: Option<String>,
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| format!("'{raw}' is not an RFC 3339 timestamp: {err}"))
}

/// 🎯 Turn the flags into run options. A range that ends before it starts is refused.
fn run_options(args: &Args) -> Result<RunOptions> {
    if let (Some(from), Some(until)) = (args.from, args.until) {
        if until < from {
            anyhow::bail!(
                "💀 --until ({}) is before --from ({}). That range is empty by construction.",
                until.to_rfc3339(),
                from.to_rfc3339()
            );
        }
    }
    Ok(RunOptions {
        selection: Selection {
            from: args.from,
            until: args.until,
            source_id: args.source.clone(),
            single_id: args.single_id.clone(),
            delete_source: args.delete_source.clone(),
        },
        full: args.full,
    })
}

/// 🚀 main(): where it all begins. The genesis. The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle choice we're trying to move past
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if let Some(path) = args.config.as_deref() {
        let exists = path.try_exists().with_context(|| {
            format!(
                "💀 Could not check whether the configuration file exists. Maybe it's a pwd/cwd thing; \
                 an absolute path is absolutely certain. Was checking here: '{}'",
                path.display()
            )
        })?;
        if !exists {
            anyhow::bail!(
                "💀 The configuration file '{}' does not exist. Double check the path.",
                path.display()
            );
        }
    }

    let mut config = load_config(args.config.as_deref())
        .context("💀 In bibdex-cli, main, we couldn't load the configuration. Make sure you didn't forget something obvious.")?;
    if let Some(prefix) = args.dump_prefix.clone() {
        info!("📝 dump mode: requests go to '{}-NNNNNN.json' instead of the index", prefix);
        config.sink = SinkConfig::Dump(DumpSinkConfig { prefix });
    }

    let options = run_options(&args)?;

    // 🛑 Ctrl-C cancels the token; in-flight work is drained before we leave
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, wrapping up what's in flight");
            on_signal.cancel();
        }
    });

    match bibdex::run(config, options, cancel).await {
        Ok(summary) => {
            println!("{}", summary.to_table());
            Ok(())
        }
        Err(err) => {
            if matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Interrupted)) {
                error!("{}", err);
                std::process::exit(130);
            }
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }
            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like the index isn't reachable. Check that Solr is actually running \
                     and that sink.Solr.url points at the right core. Even servers need a nudge sometimes. ☕"
                );
            }
            std::process::exit(1);
        }
    }
}
