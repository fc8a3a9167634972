use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use url::Url;

use crate::crawler::frontier::Frontier;
use crate::extract::selectors::{CompiledSelectors, SelectorTable};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SpiderConfig {
    pub crawler: CrawlerSettings,
    pub render: RenderSettings,
    pub output: OutputSettings,
    pub selectors: SelectorSettings,
}

/// Crawler-specific settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CrawlerSettings {
    /// Scraped videos after which no further task is dispatched
    pub max_videos: usize,
    pub max_depth: u32,
    /// Pages of one paginated listing, first page included
    pub max_pages_per_group: u32,
    pub skip_categories: bool,
    /// Maximum renders in flight at once
    pub concurrency: usize,
    pub politeness_delay: u64,  // Delay between dispatches to one host in milliseconds
    /// Checkpoint every time the scraped video count crosses a multiple of this
    pub checkpoint_interval: usize,
    pub crawl_timeout: Option<u64>, // Whole-crawl budget in seconds
    pub shutdown_grace: u64, // Seconds in-flight renders get to drain after a stop
    pub allowed_domains: Vec<String>,
    pub url_patterns: UrlPatterns,
}

/// URL pattern settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct UrlPatterns {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Rendering service settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RenderSettings {
    pub splash_url: String,
    /// Replacement for the built-in control script
    pub script_path: Option<PathBuf>,
    pub wait_seconds: f64,
    pub timeout_seconds: u64,
    pub load_images: bool,
    pub resource_timeout_seconds: u64,
    pub user_agent: String,
    pub capture_screenshots: bool,
    pub retry: RetrySettings,
}

/// Retry policy layered above the render client
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Random extra delay, as a percentage of the backoff delay
    pub jitter_percent: u8,
}

/// Export format of the entity graph
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Gexf,
}

/// Output locations
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OutputSettings {
    pub output_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub graph_file_stem: String,
    pub formats: Vec<ExportFormat>,
}

/// Selector tables: a default plus per-site overrides keyed by host substring
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SelectorSettings {
    pub default: SelectorTable,
    pub sites: BTreeMap<String, SelectorTable>,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            max_videos: 100,
            max_depth: 1,
            max_pages_per_group: 3,
            skip_categories: false,
            concurrency: 16,
            politeness_delay: 1000,
            checkpoint_interval: 10,
            crawl_timeout: None,
            shutdown_grace: 30,
            allowed_domains: vec![],
            url_patterns: UrlPatterns::default(),
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            splash_url: "http://localhost:8050".to_string(),
            script_path: None,
            wait_seconds: 3.0,
            timeout_seconds: 90,
            load_images: false,
            resource_timeout_seconds: 15,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
            capture_screenshots: false,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter_percent: 10,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            screenshots_dir: PathBuf::from("screenshots"),
            graph_file_stem: "video_relationships".to_string(),
            formats: vec![ExportFormat::Json, ExportFormat::Gexf],
        }
    }
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            default: SelectorTable::builtin(),
            sites: BTreeMap::new(),
        }
    }
}

impl SelectorSettings {
    /// Selector table for a start URL: the default table with the first matching site
    /// override merged over it
    pub fn table_for(&self, url: &str) -> SelectorTable {
        let mut table = self.default.clone();
        if let Some((site, overrides)) = self.sites.iter().find(|(site, _)| url.contains(site.as_str())) {
            debug!("Using selectors for site: {}", site);
            table.merge(overrides);
        }
        table
    }
}

impl SpiderConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "graph-spider", "graph-spider") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the sites directory if it doesn't exist
        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        // Move back up to the config directory
        path.pop();
        path
    }

    /// Check everything that would make a crawl fail before it starts
    ///
    /// Returns the parsed start URL and the compiled selectors for it.
    pub fn validate(&self, start_url: &str) -> Result<(Url, CompiledSelectors)> {
        let url = Url::parse(start_url)
            .with_context(|| format!("Invalid start URL: {}", start_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Start URL must be http or https: {}", start_url);
        }
        if self.crawler.concurrency == 0 {
            anyhow::bail!("crawler.concurrency must be at least 1");
        }
        if self.crawler.checkpoint_interval == 0 {
            anyhow::bail!("crawler.checkpoint_interval must be at least 1");
        }
        if self.render.timeout_seconds == 0 {
            anyhow::bail!("render.timeout_seconds must be at least 1");
        }
        if self.output.formats.is_empty() {
            anyhow::bail!("output.formats must name at least one export format");
        }

        let frontier = Frontier::new(&self.crawler).context("Invalid URL pattern")?;
        if !frontier.should_crawl(url.as_str()) {
            anyhow::bail!(
                "Start URL is excluded by crawler.allowed_domains or crawler.url_patterns: {}",
                start_url
            );
        }

        let selectors = CompiledSelectors::compile(&self.selectors.table_for(start_url))
            .context("Invalid selector configuration")?;

        Ok((url, selectors))
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            // Create and save the default configuration
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let config_dir = Self::config_dir();
        let profile_path = config_dir.join("sites").join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let sites_dir = Self::config_dir().join("sites");
        let profile_path = sites_dir.join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let sites_dir = Self::config_dir().join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(sites_dir)? {
            let path = entry?.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}
