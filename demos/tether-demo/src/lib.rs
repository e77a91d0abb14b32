//! Shared command line handling for the demo binaries

use std::path::PathBuf;

use clap::Args;
use tether_core::TetherResult;
use tether_runtime::{init_tracing, LogFormat, TetherConfig, WatchMode};

/// Options both binaries accept
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Project root holding the discovery file
    #[arg(long, default_value = ".")]
    pub project: PathBuf,

    /// JSON configuration file; project defaults when absent
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Watch the discovery file by polling
    #[arg(long)]
    pub poll: bool,

    /// Log output: pretty or json
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

impl CommonArgs {
    /// Resolve the configuration (file, then environment, then flags) and
    /// install logging
    pub fn setup(&self) -> TetherResult<TetherConfig> {
        let mut config = match &self.config {
            Some(path) => TetherConfig::load(path)?,
            None => TetherConfig::for_project(&self.project),
        };
        config.apply_env()?;
        if self.poll {
            config.watch_mode = WatchMode::Poll;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        init_tracing(config.log_format, &config.log_filter)?;
        Ok(config)
    }
}
