//! CSV writers for the country tables.

use crate::models::{EnrichedTicker, PriceRecord};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn tickers_path(dir: &Path, country: &str) -> PathBuf {
    dir.join(format!("{}_etf_tickers.csv", country.to_lowercase()))
}

pub fn prices_path(dir: &Path, country: &str) -> PathBuf {
    dir.join(format!("{}_etf_prices.csv", country.to_lowercase()))
}

/// Columns: ticker, fund_desp, any carried listing columns, fund_summary,
/// fund_holdings, aum. Unavailable values are empty cells.
pub fn write_tickers<W: Write>(
    out: W,
    extra_columns: &[String],
    tickers: &[EnrichedTicker],
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);

    let mut header = vec!["ticker", "fund_desp"];
    header.extend(extra_columns.iter().map(String::as_str));
    header.extend(["fund_summary", "fund_holdings", "aum"]);
    wtr.write_record(&header)?;

    for t in tickers {
        let mut record = vec![
            t.listing.ticker.clone(),
            t.listing.fund_desp.clone().unwrap_or_default(),
        ];
        for col in extra_columns {
            record.push(t.listing.extra.get(col).cloned().flatten().unwrap_or_default());
        }
        record.push(t.metadata.fund_summary.to_string());
        record.push(t.metadata.fund_holdings.to_string());
        record.push(t.metadata.aum.to_string());
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Columns: date, ticker, r, volume.
pub fn write_prices<W: Write>(out: W, records: &[PriceRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    for rec in records {
        wtr.serialize(rec)?;
    }
    // serialize() only emits the header alongside the first record
    if records.is_empty() {
        wtr.write_record(["date", "ticker", "r", "volume"])?;
    }
    wtr.flush()?;
    Ok(())
}

fn create(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    std::fs::File::create(path).with_context(|| format!("Could not create {:?}", path))
}

pub fn save_tickers(
    dir: &Path,
    country: &str,
    extra_columns: &[String],
    tickers: &[EnrichedTicker],
) -> Result<PathBuf> {
    let path = tickers_path(dir, country);
    write_tickers(create(&path)?, extra_columns, tickers)
        .with_context(|| format!("Failed writing {:?}", path))?;
    info!("{}: {} tickers → {:?}", country, tickers.len(), path);
    Ok(path)
}

pub fn save_prices(dir: &Path, country: &str, records: &[PriceRecord]) -> Result<PathBuf> {
    let path = prices_path(dir, country);
    write_prices(create(&path)?, records).with_context(|| format!("Failed writing {:?}", path))?;
    info!("{}: {} price rows → {:?}", country, records.len(), path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Field, ListingRow, TickerMetadata};
    use chrono::NaiveDate;

    #[test]
    fn test_write_tickers_blank_for_unavailable() {
        let mut listing = ListingRow::new("XIU.TO", "ISHARES TSX 60");
        listing.extra.insert("Exchange".into(), None);
        let tickers = vec![EnrichedTicker {
            listing,
            metadata: TickerMetadata {
                fund_summary: Field::Unavailable,
                fund_holdings: Field::Available("Royal Bank|Shopify".into()),
                aum: Field::Unavailable,
            },
        }];

        let mut buf = Vec::new();
        write_tickers(&mut buf, &["Exchange".to_string()], &tickers).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "ticker,fund_desp,Exchange,fund_summary,fund_holdings,aum\n\
             XIU.TO,ISHARES TSX 60,,,Royal Bank|Shopify,\n"
        );
    }

    #[test]
    fn test_write_prices() {
        let records = vec![PriceRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            ticker: "SPY".into(),
            r: 0.5,
            volume: 1500.0,
        }];
        let mut buf = Vec::new();
        write_prices(&mut buf, &records).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "date,ticker,r,volume\n2024-01-03,SPY,0.5,1500.0\n"
        );
    }

    #[test]
    fn test_write_prices_empty_has_header() {
        let mut buf = Vec::new();
        write_prices(&mut buf, &[]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "date,ticker,r,volume\n");
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            tickers_path(Path::new("data"), "CA"),
            PathBuf::from("data/ca_etf_tickers.csv")
        );
        assert_eq!(prices_path(Path::new("out"), "US"), PathBuf::from("out/us_etf_prices.csv"));
    }
}
