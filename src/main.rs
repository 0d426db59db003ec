use anyhow::Result;
use chatline::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
