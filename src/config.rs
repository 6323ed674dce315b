use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where metrics go. Loaded once by the driver before the registry is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Parent of the per-run directory. `None` disables the folder sink.
    pub out_dir: Option<PathBuf>,
    pub console: bool,
    pub dashboard: Option<DashboardConfig>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            out_dir: Some(PathBuf::from("out")),
            console: true,
            dashboard: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub base_url: String,
    pub notebook_title: String,
    pub tags: Vec<String>,
    /// Per-request timeout. A hung dashboard never holds a request longer than this.
    pub timeout_ms: u64,
    /// Updates buffered between the driver and the network worker.
    pub queue_depth: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            notebook_title: "Experiment".to_string(),
            tags: Vec::new(),
            timeout_ms: 2000,
            queue_depth: 64,
        }
    }
}

impl ReportingConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// `TELE_CONFIG` file if set, then `TELE_OUT_DIR`, `TELE_DASHBOARD_URL` and
    /// `TELE_NO_CONSOLE` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os("TELE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(dir) = std::env::var_os("TELE_OUT_DIR") {
            config.out_dir = if dir.is_empty() { None } else { Some(PathBuf::from(dir)) };
        }
        if let Ok(url) = std::env::var("TELE_DASHBOARD_URL") {
            let dashboard = config.dashboard.get_or_insert_with(DashboardConfig::default);
            dashboard.base_url = url;
        }
        if std::env::var_os("TELE_NO_CONSOLE").is_some() {
            config.console = false;
        }

        Ok(config)
    }
}
