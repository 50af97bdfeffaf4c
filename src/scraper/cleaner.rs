use crate::models::{ListingRow, ListingTable, PriceRecord, ProfileInfo, RawBar, TickerTable};
use crate::scraper::error::ScrapeError;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

pub const SYMBOL_COLUMN: &str = "Symbol";
pub const DESCRIPTION_PREFIX: &str = "Fund Description";
pub const DROPPED_COLUMNS: [&str; 2] = ["IB Symbol", "Currency"];

// ── Listing tables → TickerTable ──────────────────────────────────────────────

/// Stack listing tables in order, outer-unioning their columns.
///
/// `Symbol` becomes `ticker`, the `Fund Description ...` column becomes
/// `fund_desp`, and `IB Symbol` / `Currency` are dropped. Every other column
/// is carried in `extra`, in first-seen order.
pub fn aggregate_listings(tables: Vec<ListingTable>) -> Result<TickerTable, ScrapeError> {
    let mut extra_columns: Vec<String> = Vec::new();
    for table in &tables {
        for col in &table.columns {
            let carried = col != SYMBOL_COLUMN
                && !col.starts_with(DESCRIPTION_PREFIX)
                && !DROPPED_COLUMNS.contains(&col.as_str());
            if carried && !extra_columns.contains(col) {
                extra_columns.push(col.clone());
            }
        }
    }

    let mut rows = Vec::new();
    for table in tables {
        let symbol_idx = table
            .column_index(SYMBOL_COLUMN)
            .ok_or_else(|| ScrapeError::MissingColumn(SYMBOL_COLUMN.to_string()))?;
        let desc_idx = table
            .columns
            .iter()
            .position(|c| c.starts_with(DESCRIPTION_PREFIX));
        let extra_idx: Vec<(&String, Option<usize>)> = extra_columns
            .iter()
            .map(|name| (name, table.column_index(name)))
            .collect();

        for cells in &table.rows {
            let extra: BTreeMap<String, Option<String>> = extra_idx
                .iter()
                .map(|(name, idx)| ((*name).clone(), idx.and_then(|i| cells.get(i)).cloned()))
                .collect();
            let ticker = cells
                .get(symbol_idx)
                .cloned()
                .ok_or_else(|| ScrapeError::MalformedTable("row shorter than header".into()))?;
            rows.push(ListingRow {
                ticker,
                fund_desp: desc_idx.and_then(|i| cells.get(i)).cloned(),
                extra,
            });
        }
    }

    Ok(TickerTable { extra_columns, rows })
}

/// Rewrite a listed symbol into the history provider's convention.
/// `BRK.B` with dot replacement and suffix `.TO` → `BRK-B.TO`.
pub fn normalise_ticker(symbol: &str, replace_dots: bool, suffix: Option<&str>) -> String {
    let mut ticker = symbol.trim().to_string();
    if replace_dots {
        ticker = ticker.replace('.', "-");
    }
    if let Some(suffix) = suffix {
        ticker.push_str(suffix);
    }
    ticker
}

pub fn normalise_tickers(table: &mut TickerTable, replace_dots: bool, suffix: Option<&str>) {
    for row in &mut table.rows {
        row.ticker = normalise_ticker(&row.ticker, replace_dots, suffix);
    }
}

/// Drop rows equal to an earlier row (all columns compared); first wins.
///
/// Rows sharing a ticker but differing elsewhere both survive; those are
/// reported so the caller can see the duplicate tickers.
pub fn dedupe_rows(table: &mut TickerTable) {
    let mut seen: HashSet<ListingRow> = HashSet::with_capacity(table.rows.len());
    table.rows.retain(|row| seen.insert(row.clone()));

    let mut tickers = HashSet::with_capacity(table.rows.len());
    for row in &table.rows {
        if !tickers.insert(row.ticker.as_str()) {
            warn!(
                "{}: listed more than once with differing columns; both rows kept",
                row.ticker
            );
        }
    }
}

// ── Profile → (summary, AUM) ──────────────────────────────────────────────────

pub const SUMMARY_KEY: &str = "longBusinessSummary";
pub const AUM_KEY: &str = "totalAssets";

/// Pull the business summary and total assets out of a profile. Both are
/// required: if either is missing the pair is rejected as a whole.
pub fn summary_and_aum(ticker: &str, info: &ProfileInfo) -> Result<(String, f64), ScrapeError> {
    let summary = info
        .get(SUMMARY_KEY)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ScrapeError::MissingField {
            ticker: ticker.to_string(),
            field: SUMMARY_KEY,
        })?;
    let aum = info
        .get(AUM_KEY)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| ScrapeError::MissingField {
            ticker: ticker.to_string(),
            field: AUM_KEY,
        })?;
    Ok((summary.to_string(), aum))
}

// ── Bars → PriceRecords ───────────────────────────────────────────────────────

/// Daily return and dollar volume from an ordered bar series.
///
/// The adjusted close is used when present. A bar without a close carries the
/// previous close forward for the next return and is itself dropped, as is the
/// first priced bar. Bars with missing or zero share volume have no dollar
/// volume and are dropped, but their close still anchors the next return.
/// Only finite values are kept.
pub fn derive_price_records(ticker: &str, bars: &[RawBar]) -> Vec<PriceRecord> {
    let mut records = Vec::with_capacity(bars.len().saturating_sub(1));
    let mut prev_close: Option<f64> = None;

    for bar in bars {
        let Some(close) = bar.adj_close.or(bar.close) else {
            continue;
        };
        let r = prev_close.map(|prev| close / prev - 1.0);
        prev_close = Some(close);

        let volume = bar.volume.filter(|&v| v > 0).map(|v| v as f64 * close);
        if let (Some(r), Some(volume)) = (r, volume) {
            if r.is_finite() && volume.is_finite() {
                records.push(PriceRecord {
                    date: bar.date,
                    ticker: ticker.to_string(),
                    r,
                    volume,
                });
            }
        }
    }

    records
}

// ── Tests ─────────────────────────────────────────────────────────────────────
