mod config;
mod export;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{AppConfig, CountryConfig};
use crate::pipeline::{CountryPipeline, PipelineStats};
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "etf-fetch", about = "ETF listings, metadata and price history", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape listing pages and print the country's ticker universe
    Tickers {
        /// Country code from config (CA, US, ...)
        country: String,
    },

    /// Build the enriched ticker table (holdings, summary, AUM) and write CSV
    Enrich { country: String },

    /// Download price history for every ticker and write CSV
    History { country: String },

    /// Full country pipeline: enriched tickers + price history
    Run {
        /// Country code, or "all" for every configured country
        country: String,

        /// Also upsert results into DuckDB
        #[arg(long)]
        store: bool,
    },

    /// Show database statistics
    Stats,

    /// Apply schema migrations without loading data
    Migrate,
}

fn resolve_countries<'a>(config: &'a AppConfig, code: &str) -> Result<Vec<&'a CountryConfig>> {
    if code.eq_ignore_ascii_case("all") {
        return Ok(config.pipeline.countries.iter().collect());
    }
    match config.country(code) {
        Some(c) => Ok(vec![c]),
        None => bail!(
            "Unknown country '{}' (configured: {})",
            code,
            config
                .pipeline
                .countries
                .iter()
                .map(|c| c.code.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn single_country<'a>(config: &'a AppConfig, code: &str) -> Result<&'a CountryConfig> {
    config
        .country(code)
        .with_context(|| format!("Unknown country '{}'", code))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "etf_fetch=info,warn",
        1 => "etf_fetch=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Tickers { country } => {
            let country = single_country(&config, &country)?;
            let table = CountryPipeline::from_config(&config)?
                .ticker_universe(country)
                .await?;
            if table.is_empty() {
                println!("No ETFs listed for {}.", country.code);
            } else {
                println!("{} tickers for {}:", table.len(), country.code);
            }
            for row in &table.rows {
                println!("  {:<12} {}", row.ticker, row.fund_desp.as_deref().unwrap_or(""));
            }
        }

        Command::Enrich { country } => {
            let country = single_country(&config, &country)?;
            let _t = utils::Timer::start(format!("{} enrichment", country.code));
            let pipeline = CountryPipeline::from_config(&config)?;
            let table = pipeline.ticker_universe(country).await?;
            let mut stats = PipelineStats::default();
            let tickers = pipeline.enrich(&table, &mut stats).await?;
            export::save_tickers(&config.export.dir, &country.code, &table.extra_columns, &tickers)?;
            info!(
                "Done: {} tickers, {} missing holdings, {} missing profiles",
                tickers.len(),
                stats.missing_holdings,
                stats.missing_profiles
            );
        }

        Command::History { country } => {
            let country = single_country(&config, &country)?;
            let _t = utils::Timer::start(format!("{} price history", country.code));
            let pipeline = CountryPipeline::from_config(&config)?;
            let table = pipeline.ticker_universe(country).await?;
            let mut stats = PipelineStats::default();
            let history = pipeline.download_history(&table, &mut stats).await?;
            export::save_prices(&config.export.dir, &country.code, &history)?;
            info!(
                "Done: {} price rows, {} empty series, {} failures",
                history.len(),
                stats.empty_histories,
                stats.history_failures
            );
        }

        Command::Run { country, store } => {
            let countries = resolve_countries(&config, &country)?;
            let pipeline = CountryPipeline::from_config(&config)?;
            let repo = if store {
                let repo = Repository::open(&config.storage.db_path)?;
                if config.storage.run_migrations {
                    repo.run_migrations()?;
                }
                Some(repo)
            } else {
                None
            };

            for country in countries {
                let _t = utils::Timer::start(format!("{} pipeline", country.code));
                let run_id = match &repo {
                    Some(repo) => Some(repo.begin_scrape_run(&country.code)?),
                    None => None,
                };

                let result = pipeline.run(country).await;
                let data = match result {
                    Ok(data) => data,
                    Err(e) => {
                        if let (Some(repo), Some(id)) = (&repo, run_id) {
                            repo.finish_scrape_run(id, 0, 0, Some(&format!("{:#}", e))).ok();
                        }
                        return Err(e).with_context(|| format!("{} pipeline failed", country.code));
                    }
                };

                export::save_tickers(
                    &config.export.dir,
                    &data.country,
                    &data.extra_columns,
                    &data.tickers,
                )?;
                export::save_prices(&config.export.dir, &data.country, &data.history)?;

                if let (Some(repo), Some(id)) = (&repo, run_id) {
                    repo.upsert_tickers(&data.country, &data.tickers)?;
                    repo.upsert_prices(&data.history)?;
                    repo.finish_scrape_run(id, data.stats.tickers, data.stats.price_rows, None)?;
                }
            }
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let tickers = repo.ticker_count()?;
            let prices = repo.price_count()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  ETF data — Database Stats");
            println!("─────────────────────────────────");
            for c in &config.pipeline.countries {
                let n = repo.list_tickers(&c.code)?.len() as i64;
                println!("  {:<8} : {} tickers", c.code, utils::fmt_number(n));
            }
            println!("  Tickers  : {}", utils::fmt_number(tickers));
            println!("  Prices   : {}", utils::fmt_number(prices));
            println!("  From     : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To       : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
