use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "gatelens")]
#[command(author, version, about = "Live terminal dashboard for CI gating pipelines", long_about = None)]
pub struct Cli {
    /// CI status endpoint returning the JSON status document
    #[arg(short, long, env = "GATELENS_URL")]
    pub url: Option<String>,

    /// Seconds between polls
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Number of columns visible at once
    #[arg(short, long)]
    pub screens: Option<usize>,

    /// Pipeline allow-list glob, repeatable; empty allows all
    #[arg(short = 'p', long = "pipeline")]
    pub pipelines: Vec<String>,

    /// Project allow-list glob, repeatable; empty allows all
    #[arg(short = 'P', long = "project")]
    pub projects: Vec<String>,

    /// Disable commit metadata enrichment
    #[arg(long, default_value_t = false)]
    pub no_details: bool,

    /// Directory working copies are cloned under
    #[arg(long)]
    pub clone_root: Option<PathBuf>,

    /// Base URL projects are cloned from
    #[arg(long, env = "GATELENS_GIT_HOST")]
    pub git_host: Option<String>,

    /// Base URL change refs are fetched from (defaults to the git host)
    #[arg(long, env = "GATELENS_REVIEW_HOST")]
    pub review_host: Option<String>,

    /// TOML config file; defaults to ./gatelens.toml when present
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Poll once, print the parsed snapshot as JSON, and exit
    #[arg(long, default_value_t = false)]
    pub once: bool,
}
