//! xentbench CLI entry point.
//!
//! Startup work, including tracing setup, lives in `cli::run`; the binary
//! only parses arguments and hands off.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = xentbench::cli::parse_cli();
    xentbench::cli::run(cli).await
}
