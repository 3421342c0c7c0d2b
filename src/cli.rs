use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(name = "darc", about = "Multi-proxy darkweb crawler")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Read seed links from file, one per line
    #[arg(short, long)]
    pub file: Option<String>,

    /// Worker role for this process
    #[arg(short, long, value_enum, default_value_t = Role::Crawler)]
    pub worker: Role,

    /// Seed links to crawl
    pub link: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Fetch stage: HTTP requests, host bootstrap, link extraction
    Crawler,
    /// Render stage: headless browser, screenshots
    Loader,
}
