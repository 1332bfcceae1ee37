//! Service and source settings

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{DEFAULT_CACHE_TTL, DEFAULT_SHARED_TTL};
use crate::domain::{DEFAULT_QUOTA_LIMIT, FilterConfig, SourceSpec};
use crate::enhance::EnhancerConfig;
use crate::error::Result;
use crate::limiter::{ControllerConfig, DEFAULT_CRITICAL_THRESHOLD, Priority, QuotaTracker};
use crate::scheduler::SchedulerConfig;

/// Everything the poll service needs to assemble its components
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub quota: QuotaConfig,
    pub controller: ControllerConfig,
    pub scheduler: SchedulerConfig,
    pub enhancer: EnhancerConfig,
    /// Root directory of the persistent cache
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub shared_ttl: Duration,
    /// How often expired cache entries are swept
    pub cleanup_interval: Duration,
    /// Shortest sleep of a source timer while its refresh is held back
    pub check_interval: Duration,
    /// How often refresh intervals are re-scaled to the quota
    pub adjust_interval: Duration,
    /// Enrich items after each refresh
    pub enrich: bool,
}

impl ServiceConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            quota: QuotaConfig::default(),
            controller: ControllerConfig::default(),
            scheduler: SchedulerConfig::default(),
            enhancer: EnhancerConfig::default(),
            cache_dir: cache_dir.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            shared_ttl: DEFAULT_SHARED_TTL,
            cleanup_interval: Duration::from_secs(600),
            check_interval: Duration::from_secs(1),
            adjust_interval: Duration::from_secs(300),
            enrich: true,
        }
    }

    /// Quota tracker to share between the API client and the service
    pub fn build_quota(&self) -> Arc<QuotaTracker> {
        Arc::new(QuotaTracker::with_threshold(self.quota.limit, self.quota.critical_threshold))
    }
}

/// Quota defaults handed to the tracker
#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    pub limit: u32,
    pub critical_threshold: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_QUOTA_LIMIT,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
        }
    }
}

/// One registered source
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub id: String,
    pub spec: SourceSpec,
    pub interval: Duration,
    pub priority: Priority,
    pub filter: FilterConfig,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, spec: SourceSpec, interval: Duration) -> Self {
        Self {
            id: id.into(),
            spec,
            interval,
            priority: Priority::Normal,
            filter: FilterConfig::default(),
        }
    }

    /// Parse `spec` (`kind:value`) into a source
    pub fn parse(id: impl Into<String>, spec: &str, interval: Duration) -> Result<Self> {
        Ok(Self::new(id, SourceSpec::parse(spec)?, interval))
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }
}
