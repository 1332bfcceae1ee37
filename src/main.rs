use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use prwatch::api::{GithubClient, ReviewApi};
use prwatch::cache::SharedCache;
use prwatch::domain::{PullRequest, SourceSpec};
use prwatch::enhance::Enhancer;
use prwatch::fetch::{AdmittedFetcher, ItemCache, build_fetcher};
use prwatch::limiter::{AdmissionController, Priority, QuotaTracker};
use prwatch::service::{PollService, SourceEvent};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;

use cli::Cli;
use cli::commands::{CacheCommands, Commands};
use config::Config;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("prwatch")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("prwatch.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Fetch {
            spec,
            no_enrich,
            fresh,
            limit,
            json,
        } => handle_fetch_command(spec, !*no_enrich, *fresh, *limit, *json, config).await,
        Commands::Watch => handle_watch_command(config).await,
        Commands::Cache { command } => handle_cache_command(command, config).await,
        Commands::Quota => handle_quota_command(config).await,
    }
}

fn github_client(config: &Config, quota: Arc<QuotaTracker>) -> Result<Arc<GithubClient>> {
    let client = GithubClient::from_env(&config.api.token_env, config.github_config(), quota)
        .context("Failed to create GitHub client")?;
    Ok(Arc::new(client))
}

fn open_cache(config: &Config) -> Result<Arc<ItemCache>> {
    let cache = ItemCache::open(&config.cache.dir)
        .context(format!("Failed to open cache at {}", config.cache.dir.display()))?;
    Ok(Arc::new(cache))
}

async fn handle_fetch_command(
    spec: &str,
    enrich: bool,
    fresh: bool,
    limit: Option<usize>,
    json: bool,
    config: &Config,
) -> Result<()> {
    info!("Fetching source: {}", spec);
    let spec = SourceSpec::parse(spec).context("Invalid source spec")?;
    let service_config = config.service_config();
    let quota = service_config.build_quota();
    let api: Arc<dyn ReviewApi> = github_client(config, Arc::clone(&quota))?;
    let controller = Arc::new(AdmissionController::new(service_config.controller.clone(), quota));
    let cache = open_cache(config)?;

    let mut filter = config
        .sources
        .iter()
        .find(|s| s.spec == spec.to_string())
        .map(|s| s.filter.clone())
        .unwrap_or_default();
    if let Some(limit) = limit {
        filter = filter.with_max_results(limit);
    }

    let cached = build_fetcher(&spec, Arc::clone(&api), cache, service_config.cache_ttl);
    if fresh {
        cached.invalidate_cache(&filter);
    }
    let fetcher = AdmittedFetcher::new(cached, Arc::clone(&controller), "cli", Priority::High)
        .with_timeout(service_config.controller.default_timeout);

    let cancel = CancellationToken::new();
    let mut items = fetcher
        .fetch_with_priority(&filter, Priority::High, &cancel)
        .await
        .context("Fetch failed")?;

    if enrich && !items.is_empty() {
        let enhancer = Enhancer::new(
            api,
            Arc::clone(&controller),
            Arc::new(SharedCache::new(service_config.shared_ttl)),
            service_config.enhancer.clone(),
        );
        items = enhancer.enhance_all("cli", items).await;
        enhancer.stop().await;
    }
    controller.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&items).context("Failed to serialize items")?);
    } else {
        print_items(&items);
        println!("{} {} item(s)", "Fetched:".green(), items.len());
    }
    Ok(())
}

fn print_items(items: &[PullRequest]) {
    for pr in items {
        let draft = if pr.draft { " [draft]".dimmed().to_string() } else { String::new() };
        println!(
            "{} {}{} {}",
            format!("{}#{}", pr.repo, pr.number).cyan(),
            pr.title,
            draft,
            format!("@{}", pr.author).dimmed()
        );
        if let Some(detail) = &pr.enhanced {
            println!(
                "    review: {:?}  checks: {:?}  merge: {:?}  comments: {}  +{} -{}",
                detail.review_status,
                detail.check_status,
                detail.merge_state,
                detail.comments + detail.review_comments,
                detail.additions,
                detail.deletions
            );
        }
    }
}

async fn handle_watch_command(config: &Config) -> Result<()> {
    let sources = config.source_configs()?;
    if sources.is_empty() {
        println!("{}", "No sources configured".yellow());
        return Ok(());
    }

    let service_config = config.service_config();
    let quota = service_config.build_quota();
    let api = github_client(config, Arc::clone(&quota))?;
    let (service, mut events) = PollService::new(api, quota, service_config).context("Failed to start poll service")?;

    for source in sources {
        println!("{} {} ({})", "Watching:".green(), source.id, source.spec);
        service.register_source(source).context("Failed to register source")?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Shutting down...".yellow());
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event);
            }
        }
    }

    service.shutdown().await;
    let quota = service.quota_status();
    info!("Stopped watching, quota remaining: {}/{}", quota.remaining, quota.limit);
    Ok(())
}

fn print_event(event: &SourceEvent) {
    match event {
        SourceEvent::RefreshStarted { source_id } => {
            info!("Refresh started: {}", source_id);
        }
        SourceEvent::Updated { source_id, items } => {
            println!("{} {} item(s) from {}", "Updated:".green(), items.len(), source_id);
            print_items(items);
        }
        SourceEvent::Enhanced { source_id, item, .. } => {
            if let Some(detail) = &item.enhanced {
                println!(
                    "{} {}#{} review: {:?} checks: {:?} ({})",
                    "Detail:".cyan(),
                    item.repo,
                    item.number,
                    detail.review_status,
                    detail.check_status,
                    source_id
                );
            }
        }
        SourceEvent::Failed { source_id, error } => {
            println!("{} {}: {}", "Failed:".red(), source_id, error);
        }
    }
}

async fn handle_cache_command(command: &CacheCommands, config: &Config) -> Result<()> {
    info!("Handling cache command: {:?}", command);
    let cache = open_cache(config)?;
    match command {
        CacheCommands::Stats => {
            let stats = cache.stats().context("Failed to read cache stats")?;
            println!("{} {}", "Cache:".green(), cache.root().display());
            println!("  entries: {}", stats.entry_count);
            println!("  size:    {} bytes", stats.total_bytes);
        }
        CacheCommands::Clean => {
            let cancel = CancellationToken::new();
            let removed = tokio::task::spawn_blocking(move || cache.clean_expired_entries(&cancel))
                .await
                .context("Cache cleanup task failed")?
                .context("Failed to clean cache")?;
            println!("{} {} expired entries", "Removed:".green(), removed);
        }
        CacheCommands::Clear => {
            let removed = cache.clear().context("Failed to clear cache")?;
            println!("{} {} entries", "Cleared:".red(), removed);
        }
    }
    Ok(())
}

async fn handle_quota_command(config: &Config) -> Result<()> {
    let quota = config.service_config().build_quota();
    let client = github_client(config, quota)?;
    let status = client
        .sync_quota(&CancellationToken::new())
        .await
        .context("Failed to query rate limit")?;

    let remaining = format!("{}/{}", status.remaining, status.limit);
    let remaining = if status.headroom() < 0.2 { remaining.red() } else { remaining.green() };
    println!("{} {}", "Quota:".cyan(), remaining);
    println!("  resets at: {}", status.reset_at.to_rfc3339());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
