use std::path::PathBuf;

use clap::Parser;
use servekit::run;

#[derive(Parser)]
#[command(name = "servekit")]
#[command(about = "Routing and middleware service runtime", long_about = None)]
struct Cli {
    /// Path to the service configuration file
    #[arg(short, long, default_value = "service.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    run(cli.config).await
}
