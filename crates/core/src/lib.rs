pub mod config;
pub mod error;
pub mod link;
pub mod types;

pub use config::AppConfig;
pub use error::{CrawlError, HookError};
pub use link::{hash_link, parse_link, parse_link_from, urljoin, Link, ProxyKind};
pub use types::*;
