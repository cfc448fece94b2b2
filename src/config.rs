use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::gitops::GitSettings;

pub const MIN_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Optional TOML configuration file.
///
/// Loaded from the path given with `--config`, falling back to
/// `./gatelens.toml` when present. Command-line options win over file
/// values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileConfig {
    pub url: Option<String>,
    pub interval: Option<u64>,
    pub screens: Option<usize>,
    #[serde(default)]
    pub pipelines: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    pub no_details: Option<bool>,
    pub clone_root: Option<PathBuf>,
    pub git_host: Option<String>,
    pub review_host: Option<String>,
}

impl FileConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }
        let candidate = Path::new("gatelens.toml");
        if candidate.exists() {
            return Self::load_from_path(candidate);
        }
        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Fully validated runtime settings. Construction failing here is the only
/// way the process exits non-zero; no worker has started yet.
#[derive(Debug, Clone)]
pub struct Settings {
    pub url: String,
    pub poll_interval: Duration,
    pub screens: usize,
    pub pipelines: Vec<String>,
    pub projects: Vec<String>,
    /// `None` means enrichment is disabled.
    pub git: Option<GitSettings>,
    pub once: bool,
}

impl Settings {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let file = FileConfig::load(cli.config.as_deref())?;

        let raw_url = cli
            .url
            .clone()
            .or(file.url)
            .context("a status URL is required (--url or config file)")?;
        let url = url::Url::parse(&raw_url)
            .with_context(|| format!("invalid status URL: {raw_url}"))?;

        let interval = cli
            .interval
            .or(file.interval)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if interval < MIN_POLL_INTERVAL_SECS {
            bail!("poll interval must be at least {MIN_POLL_INTERVAL_SECS}s, got {interval}s");
        }

        let screens = cli.screens.or(file.screens).unwrap_or(1);
        if screens == 0 {
            bail!("screen count must be greater than zero");
        }

        let pipelines = if cli.pipelines.is_empty() {
            file.pipelines
        } else {
            cli.pipelines.clone()
        };
        let projects = if cli.projects.is_empty() {
            file.projects
        } else {
            cli.projects.clone()
        };

        let details = !(cli.no_details || file.no_details.unwrap_or(false));
        let git = if details {
            let git_host = cli
                .git_host
                .clone()
                .or(file.git_host)
                .context("--git-host is required unless --no-details is set")?;
            let review_host = cli
                .review_host
                .clone()
                .or(file.review_host)
                .unwrap_or_else(|| git_host.clone());
            let clone_root = cli
                .clone_root
                .clone()
                .or(file.clone_root)
                .or_else(|| dirs::cache_dir().map(|dir| dir.join("gatelens").join("src")))
                .context("no clone root available; pass --clone-root")?;
            Some(GitSettings {
                clone_root,
                upstream_host: git_host,
                review_host,
            })
        } else {
            None
        };

        Ok(Self {
            url: url.to_string(),
            poll_interval: Duration::from_secs(interval),
            screens,
            pipelines,
            projects,
            git,
            once: cli.once,
        })
    }
}
