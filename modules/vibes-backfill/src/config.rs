//! Configuration: CLI flags, optional TOML file, environment secrets.
//!
//! Everything is resolved once in `main` into a [`BackfillConfig`] and an
//! [`AppConfig`]; nothing reads the environment after that.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use uuid::Uuid;

use crate::enrich::{StatsErrorClassifier, DEFAULT_STATS_ERROR_CODES, DEFAULT_STATS_ERROR_PATTERN};
use crate::error::BackfillError;
use crate::image_refresh::{
    default_placeholder_patterns, ImageRefreshOptions, DEFAULT_IMAGE_HOST, DEFAULT_MAX_IMAGES,
};
use crate::runner::RunnerConfig;
use crate::traits::ScanFilter;
use crate::types::EntityKind;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Parser)]
#[command(
    name = "vibes-backfill",
    about = "Generate missing or stale vibes for properties and neighborhoods"
)]
pub struct Cli {
    /// Entity kind to backfill: property or neighborhood
    #[arg(long, default_value = "property")]
    pub kind: EntityKind,

    /// Comma-separated entity ids; processes exactly these, once
    #[arg(long)]
    pub ids: Option<String>,

    /// Properties only: skip listings below this price
    #[arg(long)]
    pub min_price: Option<i64>,

    /// Comma-separated two-letter state codes
    #[arg(long)]
    pub states: Option<String>,

    /// Entities attempted per invocation
    #[arg(long, default_value_t = 25)]
    pub batch_size: u32,

    /// Rows fetched per scan page
    #[arg(long, default_value_t = 100)]
    pub page_size: u32,

    /// Pause after each attempted entity
    #[arg(long, default_value_t = 1_500)]
    pub delay_ms: u64,

    /// Pause between invocations
    #[arg(long, default_value_t = 5_000)]
    pub pause_between_runs_ms: u64,

    #[arg(long, default_value_t = 1_000)]
    pub max_runs: u32,

    /// Regenerate even when the source hash is unchanged
    #[arg(long)]
    pub force: bool,

    /// Refresh property galleries that are small or never refreshed
    #[arg(long)]
    pub refresh_images: bool,

    /// Refresh every property gallery
    #[arg(long)]
    pub force_refresh_images: bool,

    /// Gallery size below which a refresh is triggered
    #[arg(long, default_value_t = 10)]
    pub min_images: usize,

    /// Force regeneration and refresh galleries below 20 images
    #[arg(long)]
    pub full_refresh: bool,

    /// Do not read or write the cursor file
    #[arg(long)]
    pub no_cursor: bool,

    #[arg(long, default_value = "data/vibes-backfill/cursor.json")]
    pub cursor_path: PathBuf,

    /// Discard any saved cursor before starting
    #[arg(long)]
    pub reset_cursor: bool,

    /// Stop after this many consecutive invocations with failures and no successes
    #[arg(long, default_value_t = 3)]
    pub stop_after_no_success_runs: u32,

    #[arg(long, default_value = "data/vibes-backfill/reports")]
    pub report_dir: PathBuf,

    /// Append-only run log
    #[arg(long, default_value = "data/vibes-backfill/backfill.log")]
    pub log_file: PathBuf,

    /// Optional TOML file with model, image source and stats settings
    #[arg(long)]
    pub config: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// FileConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub generation: GenerationConfig,
    pub images: ImagesConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub actor_id: String,
    pub allowed_host: String,
    pub placeholder_patterns: Vec<String>,
    pub max_images: usize,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            actor_id: apify_client::LISTING_DETAIL_SCRAPER.to_string(),
            allowed_host: DEFAULT_IMAGE_HOST.to_string(),
            placeholder_patterns: default_placeholder_patterns(),
            max_images: DEFAULT_MAX_IMAGES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// SQLSTATE codes that disable the stats query for the rest of the run.
    pub error_codes: Vec<String>,
    /// Error message pattern with the same effect. Empty disables matching.
    pub error_pattern: String,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            error_codes: DEFAULT_STATS_ERROR_CODES.iter().map(|s| s.to_string()).collect(),
            error_pattern: DEFAULT_STATS_ERROR_PATTERN.to_string(),
        }
    }
}

impl StatsConfig {
    pub fn classifier(&self) -> Result<StatsErrorClassifier, BackfillError> {
        let pattern = Some(self.error_pattern.as_str()).filter(|p| !p.is_empty());
        StatsErrorClassifier::new(self.error_codes.clone(), pattern)
            .map_err(|e| BackfillError::Config(format!("stats.error_pattern: {e}")))
    }
}

/// Load and parse a TOML config file.
pub fn load_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// AppConfig (secrets)
// ---------------------------------------------------------------------------

/// Secrets and connection strings from the environment (and `.env`).
#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub apify_api_key: Option<String>,
}

impl AppConfig {
    /// `APIFY_API_KEY` is only required when galleries will be refreshed.
    pub fn from_env(require_apify: bool) -> Result<Self, BackfillError> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: required_env("DATABASE_URL")?,
            anthropic_api_key: required_env("ANTHROPIC_API_KEY")?,
            apify_api_key: optional_env("APIFY_API_KEY"),
        };
        if require_apify && config.apify_api_key.is_none() {
            return Err(BackfillError::MissingCredential("APIFY_API_KEY"));
        }

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", redact_url(&self.database_url));
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview(&self.anthropic_api_key));
        tracing::info!(
            "  APIFY_API_KEY: {}",
            self.apify_api_key.as_deref().map(preview).unwrap_or_else(|| "<not set>".into())
        );
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &redact_url(&self.database_url))
            .field("anthropic_api_key", &preview(&self.anthropic_api_key))
            .field("apify_api_key", &self.apify_api_key.as_deref().map(preview))
            .finish()
    }
}

fn required_env(key: &'static str) -> Result<String, BackfillError> {
    optional_env(key).ok_or(BackfillError::MissingCredential(key))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn preview(val: &str) -> String {
    let n = val.chars().take(5).map(char::len_utf8).sum::<usize>();
    format!("{}...({} chars)", &val[..n], val.len())
}

fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable>".to_string(),
    }
}

// ---------------------------------------------------------------------------
// BackfillConfig
// ---------------------------------------------------------------------------

/// The resolved, validated run configuration.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub runner: RunnerConfig,
    pub cursor_path: PathBuf,
    pub report_dir: PathBuf,
    pub log_file: PathBuf,
    pub file: FileConfig,
}

const STATE_CODES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY", "DC", "PR", "VI", "GU", "AS", "MP",
];

impl BackfillConfig {
    /// Combine CLI flags with the file config and validate the result.
    /// `data_source` is the credential-free database label for the cursor.
    pub fn build(
        cli: &Cli,
        file: FileConfig,
        data_source: impl Into<String>,
    ) -> Result<Self, BackfillError> {
        let ids = match &cli.ids {
            Some(raw) => parse_ids(raw)?,
            None => Vec::new(),
        };
        let state_codes = match &cli.states {
            Some(raw) => parse_state_codes(raw)?,
            None => Vec::new(),
        };

        if !ids.is_empty() && (cli.min_price.is_some() || !state_codes.is_empty()) {
            return Err(BackfillError::Config(
                "--ids cannot be combined with --min-price or --states".into(),
            ));
        }
        if cli.min_price.is_some() && cli.kind != EntityKind::Property {
            return Err(BackfillError::Config(
                "--min-price only applies to --kind property".into(),
            ));
        }
        if cli.min_price.is_some_and(|p| p < 0) {
            return Err(BackfillError::Config("--min-price must not be negative".into()));
        }
        for (flag, value) in [
            ("--batch-size", cli.batch_size),
            ("--page-size", cli.page_size),
            ("--max-runs", cli.max_runs),
            ("--stop-after-no-success-runs", cli.stop_after_no_success_runs),
        ] {
            if value == 0 {
                return Err(BackfillError::Config(format!("{flag} must be at least 1")));
            }
        }
        if file.images.max_images == 0 {
            return Err(BackfillError::Config("images.max_images must be at least 1".into()));
        }
        file.stats.classifier()?;

        let mut runner = RunnerConfig::new(cli.kind);
        runner.ids = ids;
        runner.filter = ScanFilter {
            min_price: cli.min_price,
            state_codes,
        };
        runner.batch_size = cli.batch_size;
        runner.page_size = cli.page_size;
        runner.delay_ms = cli.delay_ms;
        runner.pause_between_runs_ms = cli.pause_between_runs_ms;
        runner.max_runs = cli.max_runs;
        runner.force = cli.force;
        runner.cursor_enabled = !cli.no_cursor;
        runner.reset_cursor = cli.reset_cursor;
        runner.stop_after_no_success_runs = cli.stop_after_no_success_runs;
        runner.data_source = data_source.into();
        runner.image_refresh = ImageRefreshOptions {
            enabled: cli.refresh_images || cli.force_refresh_images,
            force_refresh: cli.force_refresh_images,
            min_images: cli.min_images,
            max_images: file.images.max_images,
            allowed_host: file.images.allowed_host.clone(),
            placeholder_patterns: file.images.placeholder_patterns.clone(),
        };
        if cli.full_refresh {
            runner.apply_full_refresh();
        }
        // Galleries only exist on properties.
        if runner.kind != EntityKind::Property {
            runner.image_refresh.enabled = false;
        }

        Ok(Self {
            runner,
            cursor_path: cli.cursor_path.clone(),
            report_dir: cli.report_dir.clone(),
            log_file: cli.log_file.clone(),
            file,
        })
    }

    pub fn needs_image_source(&self) -> bool {
        self.runner.image_refresh.enabled
    }
}

fn parse_ids(raw: &str) -> Result<Vec<Uuid>, BackfillError> {
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = Uuid::parse_str(part).map_err(|e| BackfillError::InvalidId {
            value: part.to_string(),
            reason: e.to_string(),
        })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Err(BackfillError::Config("--ids was given but is empty".into()));
    }
    Ok(ids)
}

fn parse_state_codes(raw: &str) -> Result<Vec<String>, BackfillError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let code = s.to_ascii_uppercase();
            if STATE_CODES.contains(&code.as_str()) {
                Ok(code)
            } else {
                Err(BackfillError::InvalidStateCode(s.to_string()))
            }
        })
        .collect()
}
