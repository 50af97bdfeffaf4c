//! Country pipeline: ties listing discovery → enrichment → price history.
//!
//! ## Stages
//!
//!   1. Scrape every configured exchange of the country, in order, and stack
//!      the tables. Any listing failure aborts the run.
//!   2. Normalise tickers to the quote provider's convention, drop duplicate rows.
//!   3. For each ticker: top holdings, then summary + AUM.
//!   4. For each ticker: full daily history → returns and dollar volume.
//!
//! Everything runs sequentially in ticker order, with the throttle pause after
//! every per-ticker request. Per-ticker failures follow the [`ErrorPolicy`].

use crate::config::{AppConfig, CountryConfig, ErrorPolicy};
use crate::models::{EnrichedTicker, Field, PriceRecord, TickerMetadata, TickerTable};
use crate::scraper::cleaner::{
    aggregate_listings, dedupe_rows, derive_price_records, normalise_tickers, summary_and_aum,
};
use crate::scraper::error::ScrapeError;
use crate::scraper::{EtfDataSource, WebScraper};
use crate::utils::Throttle;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CountryPipeline {
    source: Arc<dyn EtfDataSource>,
    throttle: Throttle,
    policy: ErrorPolicy,
}

impl CountryPipeline {
    pub fn new(source: Arc<dyn EtfDataSource>, throttle: Throttle, policy: ErrorPolicy) -> Self {
        Self { source, throttle, policy }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let scraper = WebScraper::new(&config.scraper).context("Failed to build scraper")?;
        Ok(Self::new(
            Arc::new(scraper),
            Throttle::from_millis(config.pipeline.pause_ms),
            config.pipeline.error_policy,
        ))
    }

    /// Apply the error policy to one per-ticker lookup.
    fn tolerate<T>(
        &self,
        ticker: &str,
        what: &str,
        result: Result<T, ScrapeError>,
    ) -> Result<Option<T>> {
        match (result, self.policy) {
            (Ok(v), _) => Ok(Some(v)),
            (Err(e), ErrorPolicy::Strict) => {
                Err(anyhow::Error::new(e).context(format!("{what} lookup failed for {ticker}")))
            }
            (Err(e), ErrorPolicy::Tolerant) => {
                warn!("{}: {} unavailable ({})", ticker, what, e);
                Ok(None)
            }
        }
    }

    // ── Tickers ───────────────────────────────────────────────────────────────

    /// Scrape and stack the listing tables of `exchanges`, in order.
    pub async fn aggregate_exchanges(&self, exchanges: &[String]) -> Result<TickerTable> {
        let mut tables = Vec::with_capacity(exchanges.len());
        for exchange in exchanges {
            info!("Fetching ETF listing for {}", exchange);
            let table = self
                .source
                .fetch_listing(exchange)
                .await
                .with_context(|| format!("Listing scrape failed for exchange '{}'", exchange))?;
            info!("  {}: {} ETFs", exchange, table.rows.len());
            tables.push(table);
        }
        Ok(aggregate_listings(tables)?)
    }

    /// Aggregated, normalised and deduplicated ticker table for a country.
    pub async fn ticker_universe(&self, country: &CountryConfig) -> Result<TickerTable> {
        let mut table = self.aggregate_exchanges(&country.exchanges).await?;
        let listed = table.len();

        normalise_tickers(&mut table, country.replace_dots, country.ticker_suffix.as_deref());
        dedupe_rows(&mut table);

        info!(
            "{}: {} listed rows → {} tickers after dedup",
            country.code,
            listed,
            table.len()
        );
        Ok(table)
    }

    // ── Enrichment ────────────────────────────────────────────────────────────

    pub async fn enrich_ticker(&self, ticker: &str) -> Result<TickerMetadata> {
        let holdings = self.source.fetch_top_holdings(ticker).await;
        self.throttle.pause().await;
        let fund_holdings = self.tolerate(ticker, "holdings", holdings)?;

        let profile = self
            .source
            .fetch_profile(ticker)
            .await
            .and_then(|info| summary_and_aum(ticker, &info));
        self.throttle.pause().await;
        let (fund_summary, aum) = match self.tolerate(ticker, "summary/AUM", profile)? {
            Some((summary, aum)) => (Field::Available(summary), Field::Available(aum)),
            None => (Field::Unavailable, Field::Unavailable),
        };

        Ok(TickerMetadata {
            fund_summary,
            fund_holdings: fund_holdings.into(),
            aum,
        })
    }

    pub async fn enrich(
        &self,
        table: &TickerTable,
        stats: &mut PipelineStats,
    ) -> Result<Vec<EnrichedTicker>> {
        let mut enriched = Vec::with_capacity(table.len());
        for (i, row) in table.rows.iter().enumerate() {
            debug!("[{}/{}] enriching {}", i + 1, table.len(), row.ticker);
            let metadata = self.enrich_ticker(&row.ticker).await?;

            if !metadata.fund_holdings.is_available() {
                stats.missing_holdings += 1;
            }
            if !metadata.fund_summary.is_available() {
                stats.missing_profiles += 1;
            }
            enriched.push(EnrichedTicker {
                listing: row.clone(),
                metadata,
            });
        }
        Ok(enriched)
    }

    // ── History ───────────────────────────────────────────────────────────────

    /// Returns and dollar volume for one ticker. An empty series is `Ok(vec![])`.
    pub async fn download_ticker(&self, ticker: &str) -> Result<Vec<PriceRecord>, ScrapeError> {
        info!("{}", ticker);
        let bars = self.source.fetch_history(ticker).await;
        self.throttle.pause().await;
        Ok(derive_price_records(ticker, &bars?))
    }

    pub async fn download_history(
        &self,
        table: &TickerTable,
        stats: &mut PipelineStats,
    ) -> Result<Vec<PriceRecord>> {
        let mut history = Vec::new();
        for ticker in table.tickers() {
            let result = self.download_ticker(ticker).await;
            match self.tolerate(ticker, "price history", result)? {
                Some(records) if records.is_empty() => {
                    debug!("{}: no price history", ticker);
                    stats.empty_histories += 1;
                }
                Some(records) => history.extend(records),
                None => stats.history_failures += 1,
            }
        }
        stats.price_rows = history.len();
        Ok(history)
    }

    // ── Full run ──────────────────────────────────────────────────────────────

    pub async fn run(&self, country: &CountryConfig) -> Result<CountryDataset> {
        info!(
            "=== {} ({}): {} exchanges, pause {:?}, {:?} policy ===",
            country.name,
            country.code,
            country.exchanges.len(),
            self.throttle.interval(),
            self.policy
        );

        let table = self.ticker_universe(country).await?;
        let mut stats = PipelineStats {
            tickers: table.len(),
            ..Default::default()
        };

        info!("=== Step 1: Enriching {} tickers ===", table.len());
        let tickers = self.enrich(&table, &mut stats).await?;

        info!("=== Step 2: Downloading price history ({} tickers) ===", table.len());
        let history = self.download_history(&table, &mut stats).await?;

        info!(
            "=== Done {}: {} tickers | {} missing holdings | {} missing profiles | {} price rows | {} history failures ===",
            country.code,
            stats.tickers,
            stats.missing_holdings,
            stats.missing_profiles,
            stats.price_rows,
            stats.history_failures,
        );

        Ok(CountryDataset {
            country: country.code.clone(),
            extra_columns: table.extra_columns,
            tickers,
            history,
            stats,
        })
    }
}

/// Both products of one country's ticker universe.
#[derive(Debug)]
pub struct CountryDataset {
    pub country: String,
    pub extra_columns: Vec<String>,
    pub tickers: Vec<EnrichedTicker>,
    pub history: Vec<PriceRecord>,
    pub stats: PipelineStats,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PipelineStats {
    pub tickers: usize,
    pub missing_holdings: usize,
    pub missing_profiles: usize,
    pub empty_histories: usize,
    pub history_failures: usize,
    pub price_rows: usize,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
