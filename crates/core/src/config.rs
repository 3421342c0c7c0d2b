use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub tor: TorConfig,
    #[serde(default)]
    pub i2p: I2pConfig,
    #[serde(default)]
    pub zeronet: ZeronetConfig,
    #[serde(default)]
    pub freenet: FreenetConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Worker tasks per role.
    #[serde(default = "default_one")]
    pub worker_count: usize,
    /// Re-crawl cooldown. Non-finite disables caching entirely.
    #[serde(default = "default_sixty")]
    pub time_cache_seconds: f64,
    /// Sleep when the queue is empty. Non-finite means busy-poll.
    #[serde(default = "default_sixty")]
    pub darc_wait_seconds: f64,
    /// Post-render settle time. Non-finite skips the wait.
    #[serde(default = "default_sixty")]
    pub se_wait_seconds: f64,
    /// Ignore robots.txt.
    #[serde(default)]
    pub force: bool,
    /// Single-round mode: exit after the first round.
    #[serde(default)]
    pub reboot: bool,
    /// Filter loaded pools against the proxy/host lists.
    #[serde(default)]
    pub check: bool,
    /// Aggressive mode: also HEAD-check content types of extracted links.
    #[serde(default)]
    pub check_content_type: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Non-root user the daemons are dropped to when running as root.
    #[serde(default)]
    pub user: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            worker_count: default_one(),
            time_cache_seconds: default_sixty(),
            darc_wait_seconds: default_sixty(),
            se_wait_seconds: default_sixty(),
            force: false,
            reboot: false,
            check: false,
            check_content_type: false,
            request_timeout_seconds: default_request_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            user: None,
        }
    }
}

impl GeneralConfig {
    pub fn time_cache(&self) -> Option<Duration> {
        finite_duration(self.time_cache_seconds)
    }

    pub fn darc_wait(&self) -> Option<Duration> {
        finite_duration(self.darc_wait_seconds)
    }

    pub fn se_wait(&self) -> Option<Duration> {
        finite_duration(self.se_wait_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Redis-compatible backend; takes precedence over `db_url`.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Postgres fallback backend.
    #[serde(default)]
    pub db_url: Option<String>,
    #[serde(default = "default_hundred")]
    pub max_pool: usize,
    #[serde(default = "default_hundred")]
    pub bulk_size: usize,
    #[serde(default = "default_ten")]
    pub retry_interval_seconds: f64,
    #[serde(default)]
    pub use_lock: bool,
    #[serde(default = "default_ten")]
    pub lock_timeout_seconds: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            db_url: None,
            max_pool: default_hundred(),
            bulk_size: default_hundred(),
            retry_interval_seconds: default_ten(),
            use_lock: false,
            lock_timeout_seconds: default_ten(),
        }
    }
}

impl QueueConfig {
    pub fn retry_interval(&self) -> Option<Duration> {
        finite_duration(self.retry_interval_seconds)
    }

    pub fn lock_timeout(&self) -> Duration {
        finite_duration(self.lock_timeout_seconds).unwrap_or(Duration::from_secs(10))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether darc owns the daemon's lifecycle.
    #[serde(default = "default_true")]
    pub managed: bool,
    #[serde(default = "default_tor_socks")]
    pub socks_port: u16,
    #[serde(default = "default_tor_ctrl")]
    pub control_port: u16,
    #[serde(default)]
    pub control_password: Option<String>,
    #[serde(default = "default_ninety")]
    pub bootstrap_wait_seconds: f64,
    #[serde(default = "default_three")]
    pub retry: u32,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            managed: true,
            socks_port: default_tor_socks(),
            control_port: default_tor_ctrl(),
            control_password: None,
            bootstrap_wait_seconds: default_ninety(),
            retry: default_three(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct I2pConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub managed: bool,
    #[serde(default = "default_i2p_port")]
    pub http_port: u16,
    #[serde(default = "default_ninety")]
    pub bootstrap_wait_seconds: f64,
    #[serde(default = "default_three")]
    pub retry: u32,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for I2pConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            managed: true,
            http_port: default_i2p_port(),
            bootstrap_wait_seconds: default_ninety(),
            retry: default_three(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ZeronetConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub managed: bool,
    #[serde(default = "default_zeronet_port")]
    pub port: u16,
    #[serde(default = "default_zeronet_path")]
    pub path: String,
    #[serde(default = "default_ninety")]
    pub bootstrap_wait_seconds: f64,
    #[serde(default = "default_three")]
    pub retry: u32,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ZeronetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            managed: true,
            port: default_zeronet_port(),
            path: default_zeronet_path(),
            bootstrap_wait_seconds: default_ninety(),
            retry: default_three(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FreenetConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub managed: bool,
    #[serde(default = "default_freenet_port")]
    pub port: u16,
    #[serde(default = "default_freenet_path")]
    pub path: String,
    #[serde(default = "default_ninety")]
    pub bootstrap_wait_seconds: f64,
    #[serde(default = "default_three")]
    pub retry: u32,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for FreenetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            managed: true,
            port: default_freenet_port(),
            path: default_freenet_path(),
            bootstrap_wait_seconds: default_ninety(),
            retry: default_three(),
            args: Vec::new(),
        }
    }
}

/// Three-stage keep/drop lists. Black beats white beats fallback.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilterConfig {
    #[serde(default)]
    pub proxy_white_list: Vec<String>,
    #[serde(default)]
    pub proxy_black_list: Vec<String>,
    #[serde(default)]
    pub proxy_fallback: bool,
    #[serde(default)]
    pub link_white_list: Vec<String>,
    #[serde(default)]
    pub link_black_list: Vec<String>,
    #[serde(default)]
    pub link_fallback: bool,
    #[serde(default)]
    pub mime_white_list: Vec<String>,
    #[serde(default)]
    pub mime_black_list: Vec<String>,
    #[serde(default)]
    pub mime_fallback: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default)]
    pub new_host: Option<String>,
    #[serde(default)]
    pub requests: Option<String>,
    #[serde(default)]
    pub selenium: Option<String>,
    #[serde(default = "default_three")]
    pub retry: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            new_host: None,
            requests: None,
            selenium: None,
            retry: default_three(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExtractionConfig {
    /// Extra text-scan patterns on top of the built-in set.
    #[serde(default)]
    pub url_patterns: Vec<UrlPattern>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UrlPattern {
    /// Scheme prefixed onto matches that carry none.
    pub scheme: String,
    pub pattern: String,
}

fn finite_duration(seconds: f64) -> Option<Duration> {
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}

fn default_data_dir() -> String { "data".to_string() }
fn default_one() -> usize { 1 }
fn default_sixty() -> f64 { 60.0 }
fn default_ninety() -> f64 { 90.0 }
fn default_ten() -> f64 { 10.0 }
fn default_hundred() -> usize { 100 }
fn default_three() -> u32 { 3 }
fn default_true() -> bool { true }
fn default_request_timeout() -> u64 { 120 }
fn default_connect_timeout() -> u64 { 30 }
fn default_tor_socks() -> u16 { 9050 }
fn default_tor_ctrl() -> u16 { 9051 }
fn default_i2p_port() -> u16 { 4444 }
fn default_zeronet_port() -> u16 { 43110 }
fn default_zeronet_path() -> String { "/usr/local/src/zeronet".to_string() }
fn default_freenet_port() -> u16 { 8888 }
fn default_freenet_path() -> String { "/usr/local/src/freenet".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.general.data_dir, "data");
        assert_eq!(config.queue.max_pool, 100);
        assert_eq!(config.tor.socks_port, 9050);
        assert!(config.tor.enabled);
        assert_eq!(config.general.time_cache(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn non_finite_time_cache_disables_caching() {
        let config: AppConfig = toml::from_str("[general]\ntime_cache_seconds = inf\n").unwrap();
        assert_eq!(config.general.time_cache(), None);
    }
}
