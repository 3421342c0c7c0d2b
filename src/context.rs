//! The crawler context: every shared handle the workers need, built once
//! at startup and passed around behind an `Arc`. Registries are
//! concurrent-read after construction.

use std::sync::Arc;

use anyhow::Result;

use darc_core::{AppConfig, RoundHook};
use darc_networks::{ProxyRegistry, ProxySupervisor};
use darc_parser::{FilterPolicy, LinkExtractor};
use darc_queue::TaskQueue;
use darc_sites::SiteRegistry;
use darc_storage::{Archive, Submitter};

pub struct Darc {
    pub config: AppConfig,
    pub queue: TaskQueue,
    pub proxies: ProxyRegistry,
    pub sites: SiteRegistry,
    pub archive: Arc<Archive>,
    pub submitter: Submitter,
    pub supervisor: ProxySupervisor,
    pub extractor: LinkExtractor,
    pub policy: Arc<FilterPolicy>,
    pub hooks: Vec<Arc<dyn RoundHook>>,
}

impl Darc {
    pub async fn bootstrap(config: AppConfig) -> Result<Self> {
        let policy = Arc::new(FilterPolicy::from_config(&config.filters)?);
        let time_cache = config.general.time_cache();
        let archive = Arc::new(Archive::new(&config.general.data_dir, time_cache)?);

        let check = config.general.check || config.general.check_content_type;
        let queue = TaskQueue::connect(&config.queue, time_cache, policy.clone(), check).await?;

        let proxies = ProxyRegistry::new(&config);
        let sites = SiteRegistry::new(archive.clone(), config.general.se_wait());
        let submitter = Submitter::new(&config.api, archive.root());
        let supervisor = ProxySupervisor::new(&config);
        let extractor = LinkExtractor::new(&config.extraction.url_patterns);

        Ok(Self {
            config,
            queue,
            proxies,
            sites,
            archive,
            submitter,
            supervisor,
            extractor,
            policy,
            hooks: Vec::new(),
        })
    }

    /// Install a round hook; must happen before workers start.
    pub fn register_hook(&mut self, hook: Arc<dyn RoundHook>) {
        self.hooks.push(hook);
    }
}
