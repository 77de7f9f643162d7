//! Write a synthetic workload file.
//!
//! ```bash
//! gen-workload load.bin --records 1000000 --transactions 1000000 --query-ratio 0.5
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use contreap::Workload;
use contreap::workload::GenerateOptions;

#[derive(Debug, Parser)]
#[command(name = "gen-workload", version, about = "Generate a synthetic contreap workload")]
struct Cli {
    /// Output file.
    output: PathBuf,

    /// Initial keys.
    #[arg(long, default_value_t = 100_000)]
    records: usize,

    /// Transactions after the initial build.
    #[arg(long, default_value_t = 100_000)]
    transactions: usize,

    /// Keys are uniform in `[0, key_space)`.
    #[arg(long, default_value_t = 1 << 32)]
    key_space: u64,

    /// Fraction of queries.
    #[arg(long, default_value_t = 0.5)]
    query_ratio: f64,

    /// Fraction of inserts; the remainder are deletes.
    #[arg(long, default_value_t = 0.25)]
    insert_ratio: f64,

    /// Widest query range; 0 for point lookups only.
    #[arg(long, default_value_t = 1_000)]
    max_range: u64,

    /// RNG seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    contreap::init_tracing();
    let cli = Cli::parse();
    ensure!(
        (0.0..=1.0).contains(&cli.query_ratio)
            && (0.0..=1.0).contains(&cli.insert_ratio)
            && cli.query_ratio + cli.insert_ratio <= 1.0,
        "query and insert ratios must be fractions summing to at most 1"
    );

    let workload = Workload::generate(&GenerateOptions {
        records: cli.records,
        transactions: cli.transactions,
        key_space: cli.key_space,
        query_ratio: cli.query_ratio,
        insert_ratio: cli.insert_ratio,
        max_range: cli.max_range,
        seed: cli.seed,
    });
    workload
        .save(&cli.output)
        .with_context(|| format!("writing {}", cli.output.display()))?;
    println!(
        "wrote {} records and {} transactions to {}",
        workload.keys.len(),
        workload.transactions.len(),
        cli.output.display()
    );
    Ok(())
}
