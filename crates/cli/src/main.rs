mod engine;
mod repl;

use anyhow::Context;
use std::io;
use tracing_subscriber::EnvFilter;

use engine::{DbConfig, MemDb};
use repl::Repl;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; the REPL owns stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let db = MemDb::open(DbConfig::default()).context("failed to open database")?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut repl = Repl::new(db, stdin.lock(), stdout.lock());
    repl.run()?;
    Ok(())
}
