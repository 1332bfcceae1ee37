use eyre::{Context, Result};
use prwatch::api::{DEFAULT_BASE_URL, DEFAULT_GRAPHQL_URL, DEFAULT_TOKEN_ENV, GithubConfig};
use prwatch::domain::{DEFAULT_QUOTA_LIMIT, FilterConfig};
use prwatch::enhance::EnhancerConfig;
use prwatch::limiter::{ControllerConfig, DEFAULT_CRITICAL_THRESHOLD, Priority};
use prwatch::scheduler::SchedulerConfig;
use prwatch::service::{QuotaConfig, ServiceConfig, SourceConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub limiter: LimiterConfig,
    pub scheduler: SchedulerSection,
    pub cache: CacheConfig,
    pub pool: PoolSection,
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub graphql_url: String,
    pub token_env: String,
    pub timeout_ms: u64,
    pub per_page: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            graphql_url: DEFAULT_GRAPHQL_URL.to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            timeout_ms: 30000,
            per_page: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    pub limit: u32,
    pub max_concurrent: usize,
    pub safety_floor: u32,
    pub critical_threshold: u32,
    pub tick_ms: u64,
    pub default_timeout_ms: u64,
    pub queue_capacity: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_QUOTA_LIMIT,
            max_concurrent: 10,
            safety_floor: 10,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
            tick_ms: 100,
            default_timeout_ms: 30000,
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub min_interval_secs: u64,
    pub max_simultaneous: usize,
    pub quota_buffer: u32,
    pub stagger_window_secs: u64,
    pub check_interval_secs: u64,
    pub adjust_interval_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            min_interval_secs: 30,
            max_simultaneous: 2,
            quota_buffer: 100,
            stagger_window_secs: 60,
            check_interval_secs: 1,
            adjust_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub shared_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("prwatch"),
            ttl_secs: 300,
            cleanup_interval_secs: 600,
            shared_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub workers: usize,
    pub job_timeout_ms: u64,
    pub enrich: bool,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            workers: 5,
            job_timeout_ms: 10000,
            enrich: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub id: String,
    pub spec: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default)]
    pub filter: FilterConfig,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_priority() -> Priority {
    Priority::Normal
}

impl SourceEntry {
    pub fn to_source_config(&self) -> Result<SourceConfig> {
        let source = SourceConfig::parse(&self.id, &self.spec, Duration::from_secs(self.interval_secs))
            .context(format!("Invalid spec for source '{}'", self.id))?;
        Ok(source.with_priority(self.priority).with_filter(self.filter.clone()))
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn github_config(&self) -> GithubConfig {
        GithubConfig {
            base_url: self.api.base_url.clone(),
            graphql_url: self.api.graphql_url.clone(),
            timeout: Duration::from_millis(self.api.timeout_ms),
            per_page: self.api.per_page,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        let limiter = &self.limiter;
        let scheduler = &self.scheduler;
        let mut config = ServiceConfig::new(&self.cache.dir);

        config.quota = QuotaConfig {
            limit: limiter.limit,
            critical_threshold: limiter.critical_threshold,
        };
        config.controller = ControllerConfig {
            max_concurrent: limiter.max_concurrent.max(1),
            safety_floor: limiter.safety_floor,
            tick: Duration::from_millis(limiter.tick_ms.max(1)),
            default_timeout: Duration::from_millis(limiter.default_timeout_ms),
            queue_capacity: limiter.queue_capacity.max(1),
        };
        config.scheduler = SchedulerConfig {
            min_interval: Duration::from_secs(scheduler.min_interval_secs),
            max_simultaneous: scheduler.max_simultaneous,
            quota_buffer: scheduler.quota_buffer,
            stagger_window: Duration::from_secs(scheduler.stagger_window_secs),
        };
        config.enhancer = EnhancerConfig {
            workers: self.pool.workers.max(1),
            job_timeout: Duration::from_millis(self.pool.job_timeout_ms),
        };
        config.cache_ttl = Duration::from_secs(self.cache.ttl_secs);
        config.shared_ttl = Duration::from_secs(self.cache.shared_ttl_secs);
        config.cleanup_interval = Duration::from_secs(self.cache.cleanup_interval_secs.max(1));
        config.check_interval = Duration::from_secs(scheduler.check_interval_secs.max(1));
        config.adjust_interval = Duration::from_secs(scheduler.adjust_interval_secs.max(1));
        config.enrich = self.pool.enrich;
        config
    }

    pub fn source_configs(&self) -> Result<Vec<SourceConfig>> {
        self.sources.iter().map(SourceEntry::to_source_config).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_to_service_config() {
        let config = Config::default();
        let service = config.service_config();
        assert_eq!(service.controller.max_concurrent, 10);
        assert_eq!(service.scheduler.max_simultaneous, 2);
        assert_eq!(service.cache_ttl, Duration::from_secs(300));
        assert_eq!(service.enhancer.workers, 5);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_parse_yaml_sections() {
        let yaml = r#"
limiter:
  max_concurrent: 4
pool:
  workers: 2
sources:
  - id: team
    spec: "repos:o/a,o/b"
    priority: high
  - id: bugs
    spec: "label:bug"
    interval_secs: 120
    filter:
      include_drafts: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.limiter.max_concurrent, 4);
        assert_eq!(config.limiter.safety_floor, 10);
        assert_eq!(config.pool.workers, 2);

        let sources = config.source_configs().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].priority, Priority::High);
        assert_eq!(sources[0].interval, Duration::from_secs(300));
        assert_eq!(sources[1].interval, Duration::from_secs(120));
        assert!(!sources[1].filter.include_drafts);
        assert_eq!(sources[1].filter.state, "open");
    }

    #[test]
    fn test_invalid_source_spec() {
        let yaml = "sources:\n  - id: bad\n    spec: \"nope\"\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.source_configs().is_err());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("prwatch.yml");
        fs::write(&path, "api:\n  per_page: 50\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.api.per_page, 50);
        assert_eq!(config.api.token_env, "GITHUB_TOKEN");
    }
}
