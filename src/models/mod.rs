use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Absent marker ─────────────────────────────────────────────────────────────

/// A looked-up value, or the marker that it could not be determined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field<T> {
    Available(T),
    Unavailable,
}

impl<T> Field<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Field::Available(_))
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Field::Available(v) => Some(v),
            Field::Unavailable => None,
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(v: Option<T>) -> Self {
        v.map_or(Field::Unavailable, Field::Available)
    }
}

impl<T: fmt::Display> fmt::Display for Field<T> {
    /// Unavailable renders as an empty cell.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Available(v) => v.fmt(f),
            Field::Unavailable => Ok(()),
        }
    }
}

// ── Listing ───────────────────────────────────────────────────────────────────

/// One exchange's ETF table, header cells verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ListingTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// One ETF after column renaming. `extra` holds any remaining columns of the
/// outer union; a cell missing from a page's columns is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingRow {
    pub ticker: String,
    pub fund_desp: Option<String>,
    pub extra: BTreeMap<String, Option<String>>,
}

#[cfg(test)]
impl ListingRow {
    pub fn new(ticker: impl Into<String>, fund_desp: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            fund_desp: Some(fund_desp.into()),
            extra: BTreeMap::new(),
        }
    }
}

/// Ordered ticker universe for a country.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickerTable {
    pub extra_columns: Vec<String>,
    pub rows: Vec<ListingRow>,
}

impl TickerTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.ticker.as_str())
    }
}

// ── Enrichment ────────────────────────────────────────────────────────────────

/// Flattened profile fields keyed by provider name (`longBusinessSummary`, ...).
pub type ProfileInfo = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct TickerMetadata {
    pub fund_summary: Field<String>,
    /// Pipe-delimited names of the top holdings.
    pub fund_holdings: Field<String>,
    pub aum: Field<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedTicker {
    pub listing: ListingRow,
    pub metadata: TickerMetadata,
}

// ── Prices ────────────────────────────────────────────────────────────────────

/// One daily observation as served by the history provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    pub date: NaiveDate,
    pub close: Option<f64>,
    /// Split/dividend adjusted close.
    pub adj_close: Option<f64>,
    pub volume: Option<u64>,
}

/// Daily return and dollar volume for one (ticker, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub ticker: String,
    pub r: f64,
    pub volume: f64,
}
