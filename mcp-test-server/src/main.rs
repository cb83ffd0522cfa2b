use clap::Parser;
use mcp_test_server::{run_with_args, CliArgs};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let args = CliArgs::parse();
    run_with_args(args).await
}
