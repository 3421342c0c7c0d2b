mod bootstrap;
mod cli;
mod context;
mod crawl;
mod process;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use darc_core::config::UrlPattern;
use darc_core::{parse_link, AppConfig, Link, WorkerRole};

use crate::cli::{Cli, Role};
use crate::context::Darc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str).context("invalid config file")?;
    apply_env_overrides(&mut config);

    let role = match cli.worker {
        Role::Crawler => WorkerRole::Crawler,
        Role::Loader => WorkerRole::Loader,
    };

    let darc = Arc::new(Darc::bootstrap(config).await?);

    // seed the fetch queue before workers start
    let mut seeds: Vec<String> = cli.link.clone();
    if let Some(file) = &cli.file {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("cannot read seed file {file}"))?;
        seeds.extend(
            content
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        );
    }
    if !seeds.is_empty() {
        let links: Vec<Link> = seeds.iter().map(|seed| parse_link(seed)).collect();
        darc.queue.save_requests(&links, None, false, false).await;
        info!(count = links.len(), "seeds loaded");
    }

    process::process(darc, role).await
}

/// Environment variables override the config file, mirroring the knobs a
/// deployment would set per container.
fn apply_env_overrides(config: &mut AppConfig) {
    // general
    if let Some(value) = env_string("PATH_DATA") {
        config.general.data_dir = value;
    }
    if let Some(value) = env_usize("DARC_CPU") {
        config.general.worker_count = value;
    }
    if let Some(value) = env_f64("TIME_CACHE") {
        config.general.time_cache_seconds = value;
    }
    if let Some(value) = env_f64("DARC_WAIT") {
        config.general.darc_wait_seconds = value;
    }
    if let Some(value) = env_f64("SE_WAIT") {
        config.general.se_wait_seconds = value;
    }
    if let Some(value) = env_bool("DARC_FORCE") {
        config.general.force = value;
    }
    if let Some(value) = env_bool("DARC_REBOOT") {
        config.general.reboot = value;
    }
    if let Some(value) = env_bool("DARC_CHECK") {
        config.general.check = value;
    }
    if let Some(value) = env_bool("DARC_CHECK_CONTENT_TYPE") {
        config.general.check_content_type = value;
    }
    if let Some(value) = env_string("DARC_USER") {
        config.general.user = Some(value);
    }

    // queue backend
    if let Some(value) = env_string("REDIS_URL") {
        config.queue.redis_url = Some(value);
    }
    if let Some(value) = env_string("DB_URL") {
        config.queue.db_url = Some(value);
    }
    if let Some(value) = env_usize("DARC_MAX_POOL") {
        config.queue.max_pool = value;
    }
    if let Some(value) = env_usize("DARC_BULK_SIZE") {
        config.queue.bulk_size = value;
    }
    if let Some(value) = env_f64("DARC_RETRY") {
        config.queue.retry_interval_seconds = value;
    }
    if let Some(value) = env_bool("DARC_REDIS_LOCK") {
        config.queue.use_lock = value;
    }
    if let Some(value) = env_f64("DARC_LOCK_TIMEOUT") {
        config.queue.lock_timeout_seconds = value;
    }

    // proxies
    if let Some(value) = env_u16("TOR_PORT") {
        config.tor.socks_port = value;
    }
    if let Some(value) = env_u16("TOR_CTRL") {
        config.tor.control_port = value;
    }
    if let Some(value) = env_string("TOR_PASS") {
        config.tor.control_password = Some(value);
    }
    if let Some(value) = env_u32("TOR_RETRY") {
        config.tor.retry = value;
    }
    if let Some(value) = env_f64("TOR_WAIT") {
        config.tor.bootstrap_wait_seconds = value;
    }
    if let Some(value) = env_bool("DARC_TOR") {
        config.tor.managed = value;
    }
    if let Some(value) = env_u16("I2P_PORT") {
        config.i2p.http_port = value;
    }
    if let Some(value) = env_u32("I2P_RETRY") {
        config.i2p.retry = value;
    }
    if let Some(value) = env_f64("I2P_WAIT") {
        config.i2p.bootstrap_wait_seconds = value;
    }
    if let Some(value) = env_bool("DARC_I2P") {
        config.i2p.managed = value;
    }
    if let Some(value) = env_u16("ZERONET_PORT") {
        config.zeronet.port = value;
    }
    if let Some(value) = env_string("ZERONET_PATH") {
        config.zeronet.path = value;
    }
    if let Some(value) = env_u32("ZERONET_RETRY") {
        config.zeronet.retry = value;
    }
    if let Some(value) = env_f64("ZERONET_WAIT") {
        config.zeronet.bootstrap_wait_seconds = value;
    }
    if let Some(value) = env_bool("DARC_ZERONET") {
        config.zeronet.managed = value;
    }
    if let Some(value) = env_u16("FREENET_PORT") {
        config.freenet.port = value;
    }
    if let Some(value) = env_string("FREENET_PATH") {
        config.freenet.path = value;
    }
    if let Some(value) = env_u32("FREENET_RETRY") {
        config.freenet.retry = value;
    }
    if let Some(value) = env_f64("FREENET_WAIT") {
        config.freenet.bootstrap_wait_seconds = value;
    }
    if let Some(value) = env_bool("DARC_FREENET") {
        config.freenet.managed = value;
    }

    // filters, JSON lists
    if let Some(value) = env_list("PROXY_WHITE_LIST") {
        config.filters.proxy_white_list = value;
    }
    if let Some(value) = env_list("PROXY_BLACK_LIST") {
        config.filters.proxy_black_list = value;
    }
    if let Some(value) = env_bool("PROXY_FALLBACK") {
        config.filters.proxy_fallback = value;
    }
    if let Some(value) = env_list("LINK_WHITE_LIST") {
        config.filters.link_white_list = value;
    }
    if let Some(value) = env_list("LINK_BLACK_LIST") {
        config.filters.link_black_list = value;
    }
    if let Some(value) = env_bool("LINK_FALLBACK") {
        config.filters.link_fallback = value;
    }
    if let Some(value) = env_list("MIME_WHITE_LIST") {
        config.filters.mime_white_list = value;
    }
    if let Some(value) = env_list("MIME_BLACK_LIST") {
        config.filters.mime_black_list = value;
    }
    if let Some(value) = env_bool("MIME_FALLBACK") {
        config.filters.mime_fallback = value;
    }

    // submission API
    if let Some(value) = env_string("API_NEW_HOST") {
        config.api.new_host = Some(value);
    }
    if let Some(value) = env_string("API_REQUESTS") {
        config.api.requests = Some(value);
    }
    if let Some(value) = env_string("API_SELENIUM") {
        config.api.selenium = Some(value);
    }
    if let Some(value) = env_u32("API_RETRY") {
        config.api.retry = value;
    }

    // extra extraction patterns: JSON list of [scheme, pattern] pairs
    if let Ok(raw) = std::env::var("DARC_URL_PAT") {
        match serde_json::from_str::<Vec<(String, String)>>(&raw) {
            Ok(pairs) => {
                config
                    .extraction
                    .url_patterns
                    .extend(pairs.into_iter().map(|(scheme, pattern)| UrlPattern {
                        scheme,
                        pattern,
                    }));
            }
            Err(err) => warn!(%err, "ignoring malformed DARC_URL_PAT"),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_f64(name: &str) -> Option<f64> {
    env_string(name)?.parse().ok()
}

fn env_usize(name: &str) -> Option<usize> {
    env_string(name)?.parse().ok()
}

fn env_u32(name: &str) -> Option<u32> {
    env_string(name)?.parse().ok()
}

fn env_u16(name: &str) -> Option<u16> {
    env_string(name)?.parse().ok()
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name)?.parse::<i64>().ok().map(|value| value != 0)
}

fn env_list(name: &str) -> Option<Vec<String>> {
    serde_json::from_str(&env_string(name)?).ok()
}
