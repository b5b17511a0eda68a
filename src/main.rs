use anyhow::Result;
use std::path::PathBuf;
use tracing::{error, info};

use web_inventory::cli;
use web_inventory::utils::{default_log_file, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = cli::parse_args();

    // Initialize logging
    let log_file = args
        .log_file
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(default_log_file);
    init_logging(args.verbose, Some(log_file))?;

    info!("Starting web-inventory v{}", env!("CARGO_PKG_VERSION"));

    // Process commands
    match cli::process_command(args).await {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
