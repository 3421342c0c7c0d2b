//! External proxy daemon lifecycle.
//!
//! Each daemon bootstrap is idempotent (a per-daemon flag guards
//! re-entry), retried a configurable number of times, and surfaced as a
//! warning on failure: the crawl proceeds and URLs of that kind fail at
//! fetch time instead. Shutdown kills children in reverse dependency
//! order, ZeroNet rides on Tor.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use darc_core::config::{FreenetConfig, I2pConfig, TorConfig, ZeronetConfig};
use darc_core::{AppConfig, CrawlError};

struct DaemonSlot {
    name: &'static str,
    retry: u32,
    wait: Duration,
    bootstrapped: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl DaemonSlot {
    fn new(name: &'static str, enabled: bool, managed: bool, retry: u32, wait_seconds: f64) -> Self {
        let wait = if wait_seconds.is_finite() && wait_seconds > 0.0 {
            Duration::from_secs_f64(wait_seconds)
        } else {
            Duration::from_secs(90)
        };
        Self {
            name,
            retry,
            wait,
            // unmanaged daemons count as already up
            bootstrapped: AtomicBool::new(!(enabled && managed)),
            child: Mutex::new(None),
        }
    }

    fn done(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }

    async fn adopt(&self, child: Option<Child>) {
        if let Some(child) = child {
            *self.child.lock().await = Some(child);
        }
        self.bootstrapped.store(true, Ordering::SeqCst);
    }

    async fn stop(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            info!(daemon = self.name, "stopping proxy daemon");
            if let Err(err) = child.kill().await {
                warn!(daemon = self.name, %err, "failed to kill proxy daemon");
            }
        }
    }
}

pub struct ProxySupervisor {
    tor: DaemonSlot,
    i2p: DaemonSlot,
    zeronet: DaemonSlot,
    freenet: DaemonSlot,
    tor_config: TorConfig,
    i2p_config: I2pConfig,
    zeronet_config: ZeronetConfig,
    freenet_config: FreenetConfig,
    user: Option<String>,
}

impl ProxySupervisor {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            tor: DaemonSlot::new(
                "tor",
                config.tor.enabled,
                config.tor.managed,
                config.tor.retry,
                config.tor.bootstrap_wait_seconds,
            ),
            i2p: DaemonSlot::new(
                "i2p",
                config.i2p.enabled,
                config.i2p.managed,
                config.i2p.retry,
                config.i2p.bootstrap_wait_seconds,
            ),
            zeronet: DaemonSlot::new(
                "zeronet",
                config.zeronet.enabled,
                config.zeronet.managed,
                config.zeronet.retry,
                config.zeronet.bootstrap_wait_seconds,
            ),
            freenet: DaemonSlot::new(
                "freenet",
                config.freenet.enabled,
                config.freenet.managed,
                config.freenet.retry,
                config.freenet.bootstrap_wait_seconds,
            ),
            tor_config: config.tor.clone(),
            i2p_config: config.i2p.clone(),
            zeronet_config: config.zeronet.clone(),
            freenet_config: config.freenet.clone(),
            user: config.general.user.clone(),
        }
    }

    /// Bring every enabled daemon up once. Failures are warnings; the
    /// crawl continues with the affected network unavailable.
    pub async fn bootstrap_all(&self) {
        if let Err(err) = self.bootstrap_tor().await {
            warn!(%err, "tor bootstrap failed");
        }
        if let Err(err) = self.bootstrap_i2p().await {
            warn!(%err, "i2p bootstrap failed");
        }
        if let Err(err) = self.bootstrap_zeronet().await {
            warn!(%err, "zeronet bootstrap failed");
        }
        if let Err(err) = self.bootstrap_freenet().await {
            warn!(%err, "freenet bootstrap failed");
        }
    }

    pub async fn bootstrap_tor(&self) -> Result<(), CrawlError> {
        if self.tor.done() {
            return Ok(());
        }
        platform_supported()?;
        info!("bootstrapping tor");

        let mut last = None;
        for attempt in 0..=self.tor.retry {
            let mut command = Command::new("tor");
            command
                .arg("--SocksPort")
                .arg(self.tor_config.socks_port.to_string())
                .arg("--ControlPort")
                .arg(self.tor_config.control_port.to_string())
                .args(&self.tor_config.args);
            match spawn_until_marker(command, &["Bootstrapped 100%"], self.tor.wait).await {
                Ok(child) => {
                    self.tor.adopt(Some(child)).await;
                    info!("tor ready");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, %err, "tor bootstrap attempt failed");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| CrawlError::Proxy("tor bootstrap".to_string())))
    }

    pub async fn bootstrap_i2p(&self) -> Result<(), CrawlError> {
        if self.i2p.done() {
            return Ok(());
        }
        platform_supported()?;
        info!("bootstrapping i2p");

        let mut last = None;
        for attempt in 0..=self.i2p.retry {
            let command = self.wrapped_command("i2prouter", &["start"], &self.i2p_config.args);
            let markers = ["running: PID:", "I2P Service is already running."];
            match spawn_until_marker(command, &markers, self.i2p.wait).await {
                Ok(child) => {
                    self.i2p.adopt(Some(child)).await;
                    info!("i2p ready");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, %err, "i2p bootstrap attempt failed");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| CrawlError::Proxy("i2p bootstrap".to_string())))
    }

    pub async fn bootstrap_zeronet(&self) -> Result<(), CrawlError> {
        if self.zeronet.done() {
            return Ok(());
        }
        platform_supported()?;

        // ZeroNet tunnels through Tor
        if let Err(err) = self.bootstrap_tor().await {
            warn!(%err, "tor unavailable for zeronet");
        }
        info!("bootstrapping zeronet");

        let script = format!("{}/ZeroNet.sh", self.zeronet_config.path);
        let mut last = None;
        for attempt in 0..=self.zeronet.retry {
            let mut command = Command::new(&script);
            command.arg("main").args(&self.zeronet_config.args);
            match spawn_until_exit_or_timeout(command, self.zeronet.wait).await {
                Ok(child) => {
                    self.zeronet.adopt(child).await;
                    info!("zeronet ready");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, %err, "zeronet bootstrap attempt failed");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| CrawlError::Proxy("zeronet bootstrap".to_string())))
    }

    pub async fn bootstrap_freenet(&self) -> Result<(), CrawlError> {
        if self.freenet.done() {
            return Ok(());
        }
        platform_supported()?;
        info!("bootstrapping freenet");

        let script = format!("{}/run.sh", self.freenet_config.path);
        let mut last = None;
        for attempt in 0..=self.freenet.retry {
            let mut command = Command::new(&script);
            command.arg("start").args(&self.freenet_config.args);
            match spawn_until_exit_or_timeout(command, self.freenet.wait).await {
                Ok(child) => {
                    self.freenet.adopt(child).await;
                    info!("freenet ready");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, %err, "freenet bootstrap attempt failed");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| CrawlError::Proxy("freenet bootstrap".to_string())))
    }

    /// Ask Tor for a fresh circuit. Called between worker rounds; failure
    /// never interrupts the crawl.
    pub async fn renew_tor(&self) {
        if !self.tor_config.enabled {
            return;
        }
        if let Err(err) = newnym(
            self.tor_config.control_port,
            self.tor_config.control_password.as_deref(),
        )
        .await
        {
            debug!(%err, "tor session renewal failed");
        }
    }

    /// Kill children in reverse dependency order.
    pub async fn shutdown(&self) {
        self.freenet.stop().await;
        self.zeronet.stop().await;
        self.i2p.stop().await;
        self.tor.stop().await;
    }

    /// Daemons refuse to run as root; re-spawn under the configured user.
    fn wrapped_command(&self, program: &str, args: &[&str], extra: &[String]) -> Command {
        let is_root = std::env::var("USER").map(|user| user == "root").unwrap_or(false);
        match (&self.user, is_root) {
            (Some(user), true) => {
                let mut command = Command::new("su");
                command.arg("-").arg(user).arg(program).args(args).args(extra);
                command
            }
            _ => {
                let mut command = Command::new(program);
                command.args(args).args(extra);
                command
            }
        }
    }
}

fn platform_supported() -> Result<(), CrawlError> {
    if cfg!(unix) {
        Ok(())
    } else {
        Err(CrawlError::UnsupportedPlatform(format!(
            "unsupported system: {}",
            std::env::consts::OS
        )))
    }
}

/// Spawn a foreground daemon and scan its stdout for a readiness marker.
async fn spawn_until_marker(
    mut command: Command,
    markers: &[&str],
    wait: Duration,
) -> Result<Child, CrawlError> {
    command.stdout(Stdio::piped()).stderr(Stdio::null());
    let mut child = command
        .spawn()
        .map_err(|err| CrawlError::Proxy(format!("spawn: {err}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CrawlError::Proxy("no stdout handle".to_string()))?;
    let mut lines = BufReader::new(stdout).lines();

    let ready = timeout(wait, async {
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(%line, "daemon output");
            if markers.iter().any(|marker| line.contains(marker)) {
                return true;
            }
        }
        false
    })
    .await;

    match ready {
        Ok(true) => {
            // keep draining so the child never blocks on a full pipe
            tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });
            Ok(child)
        }
        Ok(false) => {
            let _ = child.kill().await;
            Err(CrawlError::Proxy("daemon exited before becoming ready".to_string()))
        }
        Err(_) => {
            let _ = child.kill().await;
            Err(CrawlError::Timeout(wait.as_secs()))
        }
    }
}

/// Spawn a daemon script that either daemonizes (clean exit) or stays in
/// the foreground (still running when the wait elapses). Only a non-zero
/// exit within the window counts as failure.
async fn spawn_until_exit_or_timeout(
    mut command: Command,
    wait: Duration,
) -> Result<Option<Child>, CrawlError> {
    command.stdout(Stdio::null()).stderr(Stdio::null());
    let mut child = command
        .spawn()
        .map_err(|err| CrawlError::Proxy(format!("spawn: {err}")))?;

    match timeout(wait, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(None),
        Ok(Ok(status)) => Err(CrawlError::Proxy(format!("daemon exited with {status}"))),
        Ok(Err(err)) => Err(CrawlError::Proxy(format!("daemon wait: {err}"))),
        Err(_) => Ok(Some(child)),
    }
}

/// The stem NEWNYM sequence, written straight over the control socket.
async fn newnym(control_port: u16, password: Option<&str>) -> Result<(), CrawlError> {
    let stream = TcpStream::connect(("127.0.0.1", control_port))
        .await
        .map_err(|err| CrawlError::Network(format!("tor control connect: {err}")))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let auth = format!("AUTHENTICATE \"{}\"\r\n", password.unwrap_or(""));
    write_half
        .write_all(auth.as_bytes())
        .await
        .map_err(|err| CrawlError::Network(err.to_string()))?;
    expect_ok(&mut reader).await?;

    write_half
        .write_all(b"SIGNAL NEWNYM\r\n")
        .await
        .map_err(|err| CrawlError::Network(err.to_string()))?;
    expect_ok(&mut reader).await?;

    let _ = write_half.write_all(b"QUIT\r\n").await;
    Ok(())
}

async fn expect_ok<R>(reader: &mut BufReader<R>) -> Result<(), CrawlError>
where
    R: AsyncReadExt + Unpin,
{
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|err| CrawlError::Network(err.to_string()))?;
    if line.starts_with("250") {
        Ok(())
    } else {
        Err(CrawlError::Proxy(format!("tor control refused: {}", line.trim())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmanaged_daemons_count_as_bootstrapped() {
        let mut config = AppConfig::default();
        config.tor.managed = false;
        let supervisor = ProxySupervisor::new(&config);
        assert!(supervisor.tor.done());
        assert!(!supervisor.i2p.done());
    }

    #[test]
    fn disabled_daemons_never_bootstrap() {
        let mut config = AppConfig::default();
        config.freenet.enabled = false;
        let supervisor = ProxySupervisor::new(&config);
        assert!(supervisor.freenet.done());
    }
}
