use crate::models::{EnrichedTicker, PriceRecord};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS etf_tickers (
    country         VARCHAR  NOT NULL,
    ticker          VARCHAR  NOT NULL,
    fund_desp       VARCHAR,
    -- NULL when the lookup could not determine a value
    fund_summary    VARCHAR,
    fund_holdings   VARCHAR,
    aum             DOUBLE,
    scraped_at      TIMESTAMP NOT NULL,
    PRIMARY KEY (country, ticker)
);

CREATE TABLE IF NOT EXISTS etf_prices (
    ticker      VARCHAR  NOT NULL,
    date        DATE     NOT NULL,
    r           DOUBLE   NOT NULL,
    volume      DOUBLE   NOT NULL,
    scraped_at  TIMESTAMP NOT NULL,
    PRIMARY KEY (ticker, date)
);

CREATE SEQUENCE IF NOT EXISTS scrape_run_ids START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id              INTEGER PRIMARY KEY DEFAULT nextval('scrape_run_ids'),
    country         VARCHAR NOT NULL,
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    tickers         INTEGER DEFAULT 0,
    price_rows      INTEGER DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_prices_date   ON etf_prices (date);
CREATE INDEX IF NOT EXISTS idx_prices_ticker ON etf_prices (ticker);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Tickers ───────────────────────────────────────────────────────────────

    pub fn upsert_tickers(&self, country: &str, tickers: &[EnrichedTicker]) -> Result<usize> {
        let now = Utc::now().naive_utc();
        let tx = self.conn.unchecked_transaction()?;
        for t in tickers {
            let m = &t.metadata;
            tx.execute(
                r#"INSERT INTO etf_tickers
                       (country, ticker, fund_desp, fund_summary, fund_holdings, aum, scraped_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT (country, ticker) DO UPDATE SET
                       fund_desp     = excluded.fund_desp,
                       fund_summary  = COALESCE(excluded.fund_summary,  etf_tickers.fund_summary),
                       fund_holdings = COALESCE(excluded.fund_holdings, etf_tickers.fund_holdings),
                       aum           = COALESCE(excluded.aum,           etf_tickers.aum),
                       scraped_at    = excluded.scraped_at"#,
                params![
                    country,
                    t.listing.ticker,
                    t.listing.fund_desp,
                    m.fund_summary.as_option(),
                    m.fund_holdings.as_option(),
                    m.aum.as_option(),
                    now,
                ],
            )
            .with_context(|| format!("upsert ticker {}", t.listing.ticker))?;
        }
        tx.commit()?;
        Ok(tickers.len())
    }

    pub fn list_tickers(&self, country: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT ticker FROM etf_tickers WHERE country = ? ORDER BY ticker")?;
        let tickers = stmt
            .query_map(params![country], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tickers)
    }

    pub fn ticker_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM etf_tickers")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Prices ────────────────────────────────────────────────────────────────

    /// Upsert price records; re-running over the same history is a no-op.
    pub fn upsert_prices(&self, records: &[PriceRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let tx = self.conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO etf_prices (ticker, date, r, volume, scraped_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (ticker, date) DO UPDATE SET
                r          = excluded.r,
                volume     = excluded.volume,
                scraped_at = excluded.scraped_at
        "#;

        for rec in records {
            tx.execute(sql, params![rec.ticker, rec.date, rec.r, rec.volume, now])
                .with_context(|| format!("insert price {} {}", rec.ticker, rec.date))?;
        }

        tx.commit()?;
        Ok(records.len())
    }

    pub fn price_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM etf_prices")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let mut s = self.conn.prepare("SELECT MIN(date), MAX(date) FROM etf_prices")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, country: &str) -> Result<i64> {
        let id = self.conn.query_row(
            "INSERT INTO scrape_runs (country, started_at, status) VALUES (?, ?, 'running') RETURNING id",
            params![country, Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(
        &self,
        run_id: i64,
        tickers: usize,
        price_rows: usize,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               tickers = ?, price_rows = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                tickers as i64,
                price_rows as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Field, ListingRow, TickerMetadata};

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn enriched(ticker: &str, holdings: Field<String>, aum: Field<f64>) -> EnrichedTicker {
        EnrichedTicker {
            listing: ListingRow::new(ticker, "FUND"),
            metadata: TickerMetadata {
                fund_summary: Field::Available("Summary".into()),
                fund_holdings: holdings,
                aum,
            },
        }
    }

    #[test]
    fn test_upsert_tickers_keeps_known_fields() {
        let repo = repo();
        repo.upsert_tickers("US", &[enriched("SPY", Field::Available("Apple Inc".into()), Field::Available(1.0))])
            .unwrap();
        // later run could not determine holdings or AUM
        repo.upsert_tickers("US", &[enriched("SPY", Field::Unavailable, Field::Unavailable)])
            .unwrap();

        assert_eq!(repo.ticker_count().unwrap(), 1);
        let (holdings, aum): (Option<String>, Option<f64>) = repo
            .conn
            .query_row(
                "SELECT fund_holdings, aum FROM etf_tickers WHERE ticker = 'SPY'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(holdings.as_deref(), Some("Apple Inc"));
        assert_eq!(aum, Some(1.0));
        assert_eq!(repo.list_tickers("US").unwrap(), vec!["SPY"]);
    }

    #[test]
    fn test_upsert_prices_idempotent() {
        let repo = repo();
        let d = |day| NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
        let recs = vec![
            PriceRecord { date: d(2), ticker: "XIU.TO".into(), r: 0.01, volume: 1e6 },
            PriceRecord { date: d(3), ticker: "XIU.TO".into(), r: -0.02, volume: 2e6 },
        ];
        repo.upsert_prices(&recs).unwrap();
        repo.upsert_prices(&recs).unwrap();

        assert_eq!(repo.price_count().unwrap(), 2);
        assert_eq!(repo.date_range().unwrap(), (Some(d(2)), Some(d(3))));
        assert_eq!(repo.upsert_prices(&[]).unwrap(), 0);
    }

    #[test]
    fn test_scrape_run_log() {
        let repo = repo();
        let id = repo.begin_scrape_run("CA").unwrap();
        repo.finish_scrape_run(id, 10, 500, None).unwrap();
        let status: String = repo
            .conn
            .query_row("SELECT status FROM scrape_runs WHERE id = ?", params![id], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "success");
    }
}
