//! Benchmark driver: replays a workload file against one engine.
//!
//! ```bash
//! contreap contreap load.bin -threads 8 -clients 2 -batchsize 1000
//!
//! # Engine commits and scheduler hand-offs
//! RUST_LOG=contreap=debug cargo run --release --features tracing -- pam load.bin
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use contreap::config::DEFAULT_BATCH_SIZE;
use contreap::{EngineConfig, Method, Workload, engine};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Options accepted with a single leading dash, as the original driver
/// spelled them.
const SINGLE_DASH_OPTIONS: [&str; 3] = ["-threads", "-clients", "-batchsize"];

#[derive(Debug, Parser)]
#[command(name = "contreap", version, about = "Replay a workload against a versioned treap engine")]
struct Cli {
    /// Engine to run.
    #[arg(value_enum)]
    method: Method,

    /// Workload file.
    workload: PathBuf,

    /// Server-side threads (default: available parallelism).
    #[arg(long)]
    threads: Option<usize>,

    /// Query worker threads.
    #[arg(long, default_value_t = 1)]
    clients: usize,

    /// Batch size (`pam`) or estimation block size (`contreap`); 0 means 1.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batchsize: usize,
}

impl Cli {
    fn config(&self) -> Result<EngineConfig> {
        let threads = self.threads.unwrap_or_else(|| EngineConfig::default().threads);
        Ok(EngineConfig::new(threads, self.clients, self.batchsize)?)
    }
}

/// Rewrite `-threads` style options to `--threads`.
fn normalize_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    args.into_iter()
        .map(|arg| {
            if SINGLE_DASH_OPTIONS.contains(&arg.as_str()) {
                format!("-{arg}")
            } else {
                arg
            }
        })
        .collect()
}

fn main() -> Result<()> {
    contreap::init_tracing();
    let cli = Cli::parse_from(normalize_args(std::env::args()));
    let config = cli.config()?;
    let file = cli.workload.display();

    let workload = Workload::load(&cli.workload).with_context(|| format!("loading workload {file}"))?;
    println!("# Loaded records:\t{}", workload.keys.len());
    println!("# Loaded transactions:\t{}", workload.transactions.len());

    let mut engine = engine::create(cli.method, config);
    engine
        .init(&workload.keys, workload.transactions.len())
        .context("initializing engine")?;

    let start = Instant::now();
    for (index, transaction) in workload.transactions.iter().enumerate() {
        transaction
            .apply(engine.as_mut())
            .with_context(|| format!("transaction {index} ({transaction:?})"))?;
    }
    let results = engine.close().context("closing engine")?;
    let seconds = start.elapsed().as_secs_f64();

    #[allow(clippy::cast_precision_loss)]
    let throughput = workload.transactions.len() as f64 / seconds / 1000.0;
    let tag = format!("{}\t{file}\t{}", cli.method, config.threads);
    println!("# Time Used (S)");
    println!("{tag}\t{seconds}");
    println!("# Transaction throughput (KTPS)");
    println!("{tag}\t{throughput}");
    debug_assert_eq!(results.len(), workload.transactions.len() - workload.updates());
    Ok(())
}
