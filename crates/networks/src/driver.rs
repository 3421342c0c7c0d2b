//! Headless-browser driver factories.

use std::ffi::OsString;
use std::path::PathBuf;

use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};

use darc_core::CrawlError;

/// Page source the driver produces when it rendered nothing at all.
pub const SE_EMPTY: &str = "<html><head></head><body></body></html>";

fn chrome_binary() -> Result<PathBuf, CrawlError> {
    if let Ok(path) = std::env::var("CHROME_PATH") {
        return Ok(PathBuf::from(path));
    }
    headless_chrome::browser::default_executable()
        .map_err(|err| CrawlError::UnsupportedPlatform(format!("no chrome binary: {err}")))
}

fn launch(proxy_server: Option<String>) -> Result<Browser, CrawlError> {
    let mut extra_args: Vec<OsString> = vec![
        OsString::from("--no-sandbox"),
        OsString::from("--disable-dev-shm-usage"),
        OsString::from("--disable-gpu"),
    ];
    if let Some(proxy) = proxy_server {
        extra_args.push(OsString::from(format!("--proxy-server={proxy}")));
        // keep loopback traffic (the proxy itself) off the proxy
        extra_args.push(OsString::from(
            "--host-resolver-rules=MAP * ~NOTFOUND , EXCLUDE localhost",
        ));
    }

    let binary = chrome_binary()?;
    let mut builder = LaunchOptionsBuilder::default();
    builder
        .headless(true)
        .window_size(Some((1920, 1080)))
        .path(Some(binary))
        .args(extra_args.iter().map(|arg| arg.as_ref()).collect());

    let options = builder
        .build()
        .map_err(|err| CrawlError::Driver(format!("launch options: {err}")))?;
    Browser::new(options).map_err(|err| CrawlError::Driver(format!("browser launch: {err}")))
}

/// Browser with no proxy, for clear-web links.
pub fn null_driver() -> Result<Browser, CrawlError> {
    launch(None)
}

/// Browser proxied through the local Tor SOCKS port.
pub fn tor_driver(port: u16) -> Result<Browser, CrawlError> {
    launch(Some(format!("socks5://127.0.0.1:{port}")))
}

/// Browser proxied through the local I2P HTTP tunnel.
pub fn i2p_driver(port: u16) -> Result<Browser, CrawlError> {
    launch(Some(format!("http://127.0.0.1:{port}")))
}

/// Rendered DOM of the tab's current document.
pub fn page_source(tab: &Tab) -> Result<String, CrawlError> {
    tab.get_content()
        .map_err(|err| CrawlError::Driver(format!("page source: {err}")))
}

/// Full-page PNG screenshot.
pub fn screenshot_png(tab: &Tab) -> Result<Vec<u8>, CrawlError> {
    tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        .map_err(|err| CrawlError::Driver(format!("screenshot: {err}")))
}
