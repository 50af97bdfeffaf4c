use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

/// Provider endpoints and HTTP client settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// IB product listing page, queried with `f=567&exch=<code>`.
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Quote pages; holdings live at `<quote_url>/<ticker>/holdings`.
    #[serde(default = "default_quote_url")]
    pub quote_url: String,

    #[serde(default = "default_profile_url")]
    pub profile_url: String,

    #[serde(default = "default_chart_url")]
    pub chart_url: String,

    /// Visited once to obtain the session cookie the crumb is bound to.
    #[serde(default = "default_cookie_url")]
    pub cookie_url: String,

    /// Returns the crumb as plain text; appended to every quoteSummary query.
    #[serde(default = "default_crumb_url")]
    pub crumb_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// What to do when a single ticker's lookup fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Degrade the field to unavailable and keep going.
    #[default]
    Tolerant,
    /// Abort the country run on the first failure.
    Strict,
}

/// One country's listing venues and ticker convention.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CountryConfig {
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub exchanges: Vec<String>,
    /// Appended to every listed symbol, e.g. ".TO" for Toronto.
    #[serde(default)]
    pub ticker_suffix: Option<String>,
    /// Replace '.' with '-' in listed symbols (share-class notation).
    #[serde(default)]
    pub replace_dots: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Pause after every per-ticker fetch.
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,

    #[serde(default)]
    pub error_policy: ErrorPolicy,

    #[serde(default = "default_countries")]
    pub countries: Vec<CountryConfig>,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// CSV export configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_listing_url() -> String {
    "https://www.interactivebrokers.com/en/index.php".to_string()
}
fn default_quote_url() -> String {
    "https://finance.yahoo.com/quote".to_string()
}
fn default_profile_url() -> String {
    "https://query1.finance.yahoo.com/v10/finance/quoteSummary".to_string()
}
fn default_chart_url() -> String {
    "https://query1.finance.yahoo.com/v8/finance/chart".to_string()
}
fn default_cookie_url() -> String {
    "https://fc.yahoo.com".to_string()
}
fn default_crumb_url() -> String {
    "https://query1.finance.yahoo.com/v1/test/getcrumb".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)".to_string()
}
fn default_pause_ms() -> u64 {
    1000
}
fn default_countries() -> Vec<CountryConfig> {
    vec![
        CountryConfig {
            code: "CA".to_string(),
            name: "Canada".to_string(),
            exchanges: ["pure", "chix_ca", "omega", "tse"].map(String::from).to_vec(),
            ticker_suffix: Some(".TO".to_string()),
            replace_dots: true,
        },
        CountryConfig {
            code: "US".to_string(),
            name: "United States".to_string(),
            exchanges: ["chx", "bex", "amex", "arca"].map(String::from).to_vec(),
            ticker_suffix: None,
            replace_dots: false,
        },
    ]
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/etf.duckdb")
}
fn default_export_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_true() -> bool {
    true
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
            quote_url: default_quote_url(),
            profile_url: default_profile_url(),
            chart_url: default_chart_url(),
            cookie_url: default_cookie_url(),
            crumb_url: default_crumb_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pause_ms: default_pause_ms(),
            error_policy: ErrorPolicy::default(),
            countries: default_countries(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("ETF").separator("__"))
            .build()
            .context("Failed to read configuration")?;

        cfg.try_deserialize().context("Invalid configuration")
    }

    /// Case-insensitive lookup by country code.
    pub fn country(&self, code: &str) -> Option<&CountryConfig> {
        self.pipeline
            .countries
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_countries() {
        let cfg = AppConfig::default();
        let ca = cfg.country("ca").unwrap();
        assert_eq!(ca.name, "Canada");
        assert_eq!(ca.exchanges, vec!["pure", "chix_ca", "omega", "tse"]);
        assert_eq!(ca.ticker_suffix.as_deref(), Some(".TO"));
        assert!(ca.replace_dots);

        let us = cfg.country("US").unwrap();
        assert_eq!(us.exchanges, vec!["chx", "bex", "amex", "arca"]);
        assert!(us.ticker_suffix.is_none());
        assert!(cfg.country("MX").is_none());
    }

    #[test]
    fn test_toml_overrides() {
        let raw = r#"
            [pipeline]
            pause_ms = 250
            error_policy = "strict"

            [[pipeline.countries]]
            code = "UK"
            exchanges = ["lse"]
            ticker_suffix = ".L"
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.pipeline.pause_ms, 250);
        assert_eq!(cfg.pipeline.error_policy, ErrorPolicy::Strict);
        assert_eq!(cfg.pipeline.countries.len(), 1);
        assert!(!cfg.pipeline.countries[0].replace_dots);
        assert_eq!(cfg.scraper.timeout_secs, 30);
        assert_eq!(cfg.scraper.cookie_url, "https://fc.yahoo.com");
    }
}
