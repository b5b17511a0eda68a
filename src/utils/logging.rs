use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging system
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::from_default_env()
        .add_directive(format!("web_inventory={}", level).parse()?)
        .add_directive(format!("crawler={}", level).parse()?)
        .add_directive("warn".parse()?);

    let fmt_layer = fmt::layer().with_target(true);

    // If a log file is specified, create a file logger as well
    if let Some(log_file) = log_file {
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = fs::File::create(&log_file)
            .with_context(|| format!("Failed to create log file {}", log_file.display()))?;
        let file_layer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(Mutex::new(file));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Create a default log file path, one file per run
pub fn default_log_file() -> PathBuf {
    let mut path = if let Some(proj_dirs) =
        directories::ProjectDirs::from("com", "web-inventory", "web-inventory")
    {
        proj_dirs.data_dir().join("logs")
    } else {
        PathBuf::from("./logs")
    };

    path.push(log_file_name());
    path
}

fn log_file_name() -> String {
    format!("app-{}.log", Local::now().format("%Y-%m-%dT%H-%M-%S"))
}
