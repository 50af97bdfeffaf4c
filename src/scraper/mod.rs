pub mod cleaner;
pub mod error;
pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::models::{ListingTable, ProfileInfo, RawBar};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use self::error::ScrapeError;
use self::http_client::HttpClient;
use self::parsers::{
    parse_chart_response, parse_crumb, parse_listing_page, parse_profile_response,
    parse_top_holdings,
};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable data source abstraction. One call is one upstream request.
#[async_trait]
pub trait EtfDataSource: Send + Sync {
    /// ETF table of one exchange's listing page.
    async fn fetch_listing(&self, exchange: &str) -> Result<ListingTable, ScrapeError>;
    /// Pipe-joined top holding names.
    async fn fetch_top_holdings(&self, ticker: &str) -> Result<String, ScrapeError>;
    async fn fetch_profile(&self, ticker: &str) -> Result<ProfileInfo, ScrapeError>;
    /// Full daily history, oldest first. May be empty.
    async fn fetch_history(&self, ticker: &str) -> Result<Vec<RawBar>, ScrapeError>;
}

// ── IB listings + Yahoo quotes ────────────────────────────────────────────────

/// Interactive Brokers listing pages for discovery, Yahoo Finance for
/// holdings, profiles and price history.
///
/// quoteSummary rejects requests without a crumb tied to the session cookie,
/// so the first profile lookup bootstraps both and later lookups reuse them.
pub struct WebScraper {
    client: HttpClient,
    listing_url: String,
    quote_url: String,
    profile_url: String,
    chart_url: String,
    cookie_url: String,
    crumb_url: String,
    crumb: OnceCell<String>,
}

const PROFILE_MODULES: &str = "assetProfile,summaryProfile,summaryDetail,defaultKeyStatistics";

impl WebScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let trim = |s: &str| s.trim_end_matches('/').to_string();
        Ok(Self {
            client: HttpClient::new(config)?,
            listing_url: trim(&config.listing_url),
            quote_url: trim(&config.quote_url),
            profile_url: trim(&config.profile_url),
            chart_url: trim(&config.chart_url),
            cookie_url: config.cookie_url.clone(),
            crumb_url: config.crumb_url.clone(),
            crumb: OnceCell::new(),
        })
    }

    /// Session crumb, fetched once. A failed bootstrap is not cached, so the
    /// next profile lookup tries again.
    async fn crumb(&self) -> Result<&str, ScrapeError> {
        let crumb = self
            .crumb
            .get_or_try_init(|| async {
                self.client.touch(&self.cookie_url).await?;
                let body = self.client.get_text(&self.crumb_url).await?;
                let crumb = parse_crumb(&body)?;
                debug!("Obtained Yahoo crumb");
                Ok::<_, ScrapeError>(crumb)
            })
            .await?;
        Ok(crumb.as_str())
    }

    /// e.g. tse → index.php?f=567&exch=tse
    fn listing_page_url(&self, exchange: &str) -> Result<Url, ScrapeError> {
        Ok(Url::parse_with_params(
            &self.listing_url,
            &[("f", "567"), ("exch", exchange)],
        )?)
    }

    /// e.g. XIU.TO → /quote/XIU.TO/holdings?p=XIU.TO
    fn holdings_url(&self, ticker: &str) -> Result<Url, ScrapeError> {
        Ok(Url::parse_with_params(
            &format!("{}/{}/holdings", self.quote_url, ticker),
            &[("p", ticker)],
        )?)
    }

    fn profile_url(&self, ticker: &str, crumb: &str) -> Result<Url, ScrapeError> {
        Ok(Url::parse_with_params(
            &format!("{}/{}", self.profile_url, ticker),
            &[("modules", PROFILE_MODULES), ("crumb", crumb)],
        )?)
    }

    fn chart_url(&self, ticker: &str) -> Result<Url, ScrapeError> {
        Ok(Url::parse_with_params(
            &format!("{}/{}", self.chart_url, ticker),
            &[
                ("range", "max"),
                ("interval", "1d"),
                ("events", "div,splits"),
                ("includeAdjustedClose", "true"),
            ],
        )?)
    }
}

#[async_trait]
impl EtfDataSource for WebScraper {
    async fn fetch_listing(&self, exchange: &str) -> Result<ListingTable, ScrapeError> {
        let url = self.listing_page_url(exchange)?;
        let html = self.client.get_text(url.as_str()).await?;
        let table = parse_listing_page(&html)?;
        debug!("{}: {} listing rows", exchange, table.rows.len());
        Ok(table)
    }

    async fn fetch_top_holdings(&self, ticker: &str) -> Result<String, ScrapeError> {
        let url = self.holdings_url(ticker)?;
        let html = self.client.get_text(url.as_str()).await?;
        parse_top_holdings(&html)
    }

    async fn fetch_profile(&self, ticker: &str) -> Result<ProfileInfo, ScrapeError> {
        let crumb = self.crumb().await?;
        let url = self.profile_url(ticker, crumb)?;
        let body = self.client.get_text(url.as_str()).await?;
        parse_profile_response(&body)
    }

    async fn fetch_history(&self, ticker: &str) -> Result<Vec<RawBar>, ScrapeError> {
        let url = self.chart_url(ticker)?;
        let body = self.client.get_text(url.as_str()).await?;
        parse_chart_response(&body)
    }
}
