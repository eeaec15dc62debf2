use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use lqsmail_core::init_logging;

mod cli;

use crate::cli::{Cli, load_app_config, output_error, run_cli};

const CLI_SCHEMA_VERSION: &str = "lqsmail.cli.v1";

fn xdg_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn config_path_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("lqsmail.toml"),
        xdg_config_dir().join("lqsmail").join("lqsmail.toml"),
    ]
}

fn load_config_text() -> Option<String> {
    for path in config_path_candidates() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            tracing::debug!(path = %path.display(), "loaded config");
            return Some(content);
        }
    }
    None
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_app_config(load_config_text().as_deref());
    if let Some(err) = config.load_error.as_deref() {
        tracing::warn!(error = %err, "config ignored");
    }
    let rt = tokio::runtime::Runtime::new()?;
    if let Err(err) = run_cli(&rt, cli.command, &config) {
        return output_error(&format!("{:#}", err));
    }
    Ok(())
}
