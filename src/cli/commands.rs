use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::config::SpiderConfig;
use crate::cli::CrawlArgs;
use crate::crawler::CrawlerController;

/// Crawl from the given start URL and print the completion report
pub async fn crawl(args: CrawlArgs) -> Result<()> {
    let mut config = match &args.profile {
        Some(profile) => SpiderConfig::load_profile(profile)
            .context(format!("Failed to load profile: {}", profile))?,
        None => SpiderConfig::load_default()?,
    };
    apply_overrides(&mut config, &args);

    let controller = CrawlerController::new(config);
    let report = controller.run(&args.url).await?;

    info!("Crawl {} finished: {}", report.run_id, report.stop_reason);
    println!("{}", report);

    Ok(())
}

/// Fold command line options over the loaded configuration
fn apply_overrides(config: &mut SpiderConfig, args: &CrawlArgs) {
    if let Some(dir) = &args.output_dir {
        config.output.output_dir = dir.clone();
    }
    if let Some(dir) = &args.screenshots_dir {
        config.output.screenshots_dir = dir.clone();
        config.render.capture_screenshots = true;
    }
    if let Some(max_videos) = args.max_videos {
        config.crawler.max_videos = max_videos;
    }
    if let Some(max_depth) = args.max_depth {
        config.crawler.max_depth = max_depth;
    }
    if let Some(max_pages) = args.max_pages {
        config.crawler.max_pages_per_group = max_pages;
    }
    if args.skip_categories {
        config.crawler.skip_categories = true;
    }
    if let Some(concurrency) = args.concurrency {
        config.crawler.concurrency = concurrency;
    }
    if let Some(timeout) = args.timeout {
        config.crawler.crawl_timeout = Some(timeout);
    }
    if let Some(splash_url) = &args.splash_url {
        config.render.splash_url = splash_url.clone();
    }
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = SpiderConfig::list_profiles()?;

    println!("Available configuration profiles:");
    if profiles.is_empty() {
        println!("  No profiles found.");
    }
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a configuration profile, creating it from the defaults if it does not exist
pub fn manage_profile(profile_name: &str) -> Result<()> {
    match SpiderConfig::load_profile(profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        },
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = SpiderConfig::default();
            config.save_as_profile(profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current default configuration
pub fn show_config() -> Result<()> {
    let config = SpiderConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_overrides_replace_profile_values() {
        let mut config = SpiderConfig::default();
        let args = CrawlArgs {
            url: "https://example.com/".to_string(),
            screenshots_dir: Some(PathBuf::from("shots")),
            max_pages: Some(5),
            skip_categories: true,
            timeout: Some(600),
            splash_url: Some("http://renderer:8050".to_string()),
            ..CrawlArgs::default()
        };
        apply_overrides(&mut config, &args);

        assert!(config.render.capture_screenshots);
        assert_eq!(config.output.screenshots_dir, PathBuf::from("shots"));
        assert_eq!(config.crawler.max_pages_per_group, 5);
        assert!(config.crawler.skip_categories);
        assert_eq!(config.crawler.crawl_timeout, Some(600));
        assert_eq!(config.render.splash_url, "http://renderer:8050");
    }

    #[test]
    fn test_absent_flags_keep_profile_values() {
        let mut config = SpiderConfig::default();
        config.crawler.max_depth = 4;
        config.crawler.skip_categories = true;
        apply_overrides(&mut config, &CrawlArgs {
            url: "https://example.com/".to_string(),
            ..CrawlArgs::default()
        });

        assert_eq!(config.crawler.max_depth, 4);
        assert!(config.crawler.skip_categories);
        assert!(!config.render.capture_screenshots);
        assert_eq!(config.crawler.max_videos, 100);
    }
}
