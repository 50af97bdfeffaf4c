//! Page and payload parsers. Pure functions over fetched bodies, so every
//! layout assumption is testable offline against captured fixtures.

use crate::models::{ListingTable, ProfileInfo, RawBar};
use crate::scraper::error::ScrapeError;
use chrono::DateTime;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value;

pub const ETF_SECTION_HEADING: &str = "Exchange Traded Funds";

fn selector(s: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(s).map_err(|e| ScrapeError::Response(format!("selector {s}: {e:?}")))
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

// ── Listing page ──────────────────────────────────────────────────────────────

/// Parse the first table after the "Exchange Traded Funds" heading.
pub fn parse_listing_page(html: &str) -> Result<ListingTable, ScrapeError> {
    let doc = Html::parse_document(html);

    // `select` yields in document order, so the first table seen after the
    // heading is the one that follows it.
    let heading_or_table = selector("h3, table")?;
    let mut seen_heading = false;
    let mut table = None;
    for el in doc.select(&heading_or_table) {
        match el.value().name() {
            "h3" if cell_text(el) == ETF_SECTION_HEADING => seen_heading = true,
            "table" if seen_heading => {
                table = Some(el);
                break;
            }
            _ => {}
        }
    }

    if !seen_heading {
        return Err(ScrapeError::SectionNotFound(format!(
            "heading '{ETF_SECTION_HEADING}'"
        )));
    }
    let table = table.ok_or_else(|| {
        ScrapeError::SectionNotFound(format!("table after '{ETF_SECTION_HEADING}'"))
    })?;

    let head_row = table
        .select(&selector("thead tr")?)
        .next()
        .ok_or_else(|| ScrapeError::MalformedTable("no header row".into()))?;
    let th = selector("th")?;
    let columns: Vec<String> = head_row.select(&th).map(cell_text).collect();

    let body = table
        .select(&selector("tbody")?)
        .next()
        .ok_or_else(|| ScrapeError::MalformedTable("no table body".into()))?;

    let tr = selector("tr")?;
    let td = selector("td")?;
    let mut listing = ListingTable::new(columns);
    for row in body.select(&tr) {
        let cells: Vec<String> = row.select(&td).map(cell_text).collect();
        if cells.is_empty() {
            continue;
        }
        if cells.len() != listing.columns.len() {
            return Err(ScrapeError::MalformedTable(format!(
                "{} cells for {} columns",
                cells.len(),
                listing.columns.len()
            )));
        }
        listing.rows.push(cells);
    }

    Ok(listing)
}

// ── Holdings page ─────────────────────────────────────────────────────────────

/// Join the first cell of every top-holdings row with `|`.
pub fn parse_top_holdings(html: &str) -> Result<String, ScrapeError> {
    let doc = Html::parse_document(html);

    let container = doc
        .select(&selector(r#"div[data-test="top-holdings"]"#)?)
        .next()
        .ok_or_else(|| ScrapeError::SectionNotFound("top-holdings container".into()))?;
    let table = container
        .select(&selector("table")?)
        .next()
        .ok_or_else(|| ScrapeError::SectionNotFound("top-holdings table".into()))?;
    let body = table
        .select(&selector("tbody")?)
        .next()
        .ok_or_else(|| ScrapeError::MalformedTable("top-holdings has no body".into()))?;

    let tr = selector("tr")?;
    let td = selector("td")?;
    let names = body
        .select(&tr)
        .map(|row| {
            row.select(&td)
                .next()
                .map(cell_text)
                .ok_or_else(|| ScrapeError::MalformedTable("holding row without cells".into()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(names.join("|"))
}

// ── Chart API ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
struct ChartMeta {
    /// Seconds east of UTC for the listing exchange.
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Parse a v8 chart payload into daily bars, dated in exchange-local time.
/// A result without timestamps is an empty series, not an error.
pub fn parse_chart_response(body: &str) -> Result<Vec<RawBar>, ScrapeError> {
    let resp: ChartResponse = serde_json::from_str(body)?;

    let Some(data) = resp.chart.result.and_then(|r| r.into_iter().next()) else {
        return match resp.chart.error {
            Some(err) => Err(ScrapeError::Response(format!(
                "{}: {}",
                err.code, err.description
            ))),
            None => Ok(Vec::new()),
        };
    };

    let Some(timestamps) = data.timestamp else {
        return Ok(Vec::new());
    };

    let offset = data.meta.gmtoffset.unwrap_or(0);
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
    let adj = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose)
        .unwrap_or_default();

    timestamps
        .iter()
        .enumerate()
        .map(|(i, &ts)| {
            let date = DateTime::from_timestamp(ts + offset, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| ScrapeError::Response(format!("invalid timestamp {ts}")))?;
            Ok(RawBar {
                date,
                close: at(&quote.close, i),
                adj_close: at(&adj, i),
                volume: quote.volume.get(i).copied().flatten(),
            })
        })
        .collect()
}

fn at(v: &[Option<f64>], i: usize) -> Option<f64> {
    v.get(i).copied().flatten()
}

// ── quoteSummary API ──────────────────────────────────────────────────────────

/// Validate the plain-text crumb returned by Yahoo's getcrumb endpoint.
/// Without a session cookie that endpoint serves an HTML or empty body.
pub fn parse_crumb(body: &str) -> Result<String, ScrapeError> {
    let crumb = body.trim();
    if crumb.is_empty() || crumb.contains('<') || crumb.contains(char::is_whitespace) {
        return Err(ScrapeError::Response(format!("invalid crumb: {crumb:.40}")));
    }
    Ok(crumb.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResponse {
    quote_summary: QuoteSummary,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    result: Option<Vec<serde_json::Map<String, Value>>>,
    error: Option<ApiError>,
}

/// Flatten every module of a quoteSummary payload into one field map.
///
/// Yahoo wraps numbers as `{"raw": 1.0, "fmt": "1.00"}`; those collapse to the
/// raw value. Nulls and empty wrappers `{}` are left out, so a field that
/// carries no value is simply missing.
pub fn parse_profile_response(body: &str) -> Result<ProfileInfo, ScrapeError> {
    let resp: QuoteSummaryResponse = serde_json::from_str(body)?;

    let Some(modules) = resp.quote_summary.result.and_then(|r| r.into_iter().next()) else {
        let msg = resp
            .quote_summary
            .error
            .map(|e| format!("{}: {}", e.code, e.description))
            .unwrap_or_else(|| "empty quoteSummary result".to_string());
        return Err(ScrapeError::Response(msg));
    };

    let mut info = ProfileInfo::new();
    for (_, module) in modules {
        let Value::Object(fields) = module else { continue };
        for (key, value) in fields {
            let value = match value {
                Value::Object(mut wrapped) if wrapped.contains_key("raw") => {
                    wrapped.remove("raw").unwrap_or(Value::Null)
                }
                Value::Object(ref o) if o.is_empty() => Value::Null,
                other => other,
            };
            if !value.is_null() {
                info.entry(key).or_insert(value);
            }
        }
    }
    Ok(info)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const LISTING: &str = r##"
        <html><body>
        <h3>Stocks</h3>
        <table><thead><tr><th>Symbol</th></tr></thead>
        <tbody><tr><td>SHOP</td></tr></tbody></table>
        <h3>Exchange Traded Funds</h3>
        <div class="table-responsive">
        <table class="table">
          <thead><tr>
            <th>IB Symbol</th>
            <th>Fund Description (Click link for more details)</th>
            <th>Symbol</th>
            <th>Currency</th>
          </tr></thead>
          <tbody>
            <tr><td>XIU</td><td><a href="#">ISHARES S&amp;P/TSX 60 INDEX ETF</a></td><td>XIU</td><td>CAD</td></tr>
            <tr><td>BRK.B</td><td>SOME FUND</td><td>BRK.B</td><td>CAD</td></tr>
          </tbody>
        </table></div>
        </body></html>"##;

    #[test]
    fn test_parse_listing_page() {
        let table = parse_listing_page(LISTING).unwrap();
        assert_eq!(
            table.columns,
            vec![
                "IB Symbol",
                "Fund Description (Click link for more details)",
                "Symbol",
                "Currency"
            ]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][1], "ISHARES S&P/TSX 60 INDEX ETF");
        assert_eq!(table.rows[1][2], "BRK.B");
    }

    #[test]
    fn test_listing_without_etf_section() {
        let html = "<h3>Stocks</h3><table><thead><tr><th>Symbol</th></tr></thead></table>";
        let err = parse_listing_page(html).unwrap_err();
        assert!(matches!(err, ScrapeError::SectionNotFound(_)));
    }

    #[test]
    fn test_listing_heading_without_table() {
        let html = "<table></table><h3>Exchange Traded Funds</h3><p>none</p>";
        let err = parse_listing_page(html).unwrap_err();
        assert!(matches!(err, ScrapeError::SectionNotFound(_)));
    }

    fn etf_section(table: &str) -> String {
        format!("<h3>Exchange Traded Funds</h3>{table}")
    }

    #[test]
    fn test_listing_without_header_row() {
        let html = etf_section("<table><tbody><tr><td>XIU</td></tr></tbody></table>");
        let err = parse_listing_page(&html).unwrap_err();
        assert!(matches!(err, ScrapeError::MalformedTable(_)));
    }

    #[test]
    fn test_listing_row_cell_count_mismatch() {
        let html = etf_section(
            "<table><thead><tr><th>Symbol</th><th>Currency</th></tr></thead>\
             <tbody><tr><td>XIU</td><td>CAD</td></tr><tr><td>ZSP</td></tr></tbody></table>",
        );
        let err = parse_listing_page(&html).unwrap_err();
        assert!(matches!(err, ScrapeError::MalformedTable(m) if m.contains("1 cells for 2 columns")));
    }

    const HOLDINGS: &str = r#"
        <section><div data-test="top-holdings">
          <table>
            <thead><tr><th>Name</th><th>Symbol</th><th>% Assets</th></tr></thead>
            <tbody>
              <tr><td>Royal Bank of Canada</td><td>RY.TO</td><td>7.12%</td></tr>
              <tr><td>Shopify Inc</td><td>SHOP.TO</td><td>6.01%</td></tr>
            </tbody>
          </table>
        </div></section>"#;

    #[test]
    fn test_parse_top_holdings() {
        assert_eq!(
            parse_top_holdings(HOLDINGS).unwrap(),
            "Royal Bank of Canada|Shopify Inc"
        );
    }

    #[test]
    fn test_top_holdings_missing_section() {
        let err = parse_top_holdings("<div data-test=\"other\"></div>").unwrap_err();
        assert!(matches!(err, ScrapeError::SectionNotFound(_)));
    }

    #[test]
    fn test_top_holdings_empty_body() {
        let html = r#"<div data-test="top-holdings"><table><tbody></tbody></table></div>"#;
        assert_eq!(parse_top_holdings(html).unwrap(), "");
    }

    #[test]
    fn test_top_holdings_row_without_cells() {
        let html = r#"<div data-test="top-holdings"><table><tbody>
            <tr><td>Royal Bank of Canada</td></tr>
            <tr><th>Other</th></tr>
        </tbody></table></div>"#;
        let err = parse_top_holdings(html).unwrap_err();
        assert!(matches!(err, ScrapeError::MalformedTable(_)));
    }

    #[test]
    fn test_parse_chart_response() {
        // 2024-01-02 14:30 UTC, EST offset puts it on the same calendar day
        let body = r#"{"chart":{"result":[{
            "meta":{"currency":"USD","gmtoffset":-18000},
            "timestamp":[1704205800,1704292200],
            "indicators":{
                "quote":[{"open":[10.0,null],"high":[11.0,null],"low":[9.5,null],
                          "close":[10.5,null],"volume":[1000,null]}],
                "adjclose":[{"adjclose":[10.2,null]}]
            }}],"error":null}}"#;

        let bars = parse_chart_response(body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].close, Some(10.5));
        assert_eq!(bars[0].adj_close, Some(10.2));
        assert_eq!(bars[0].volume, Some(1000));
        assert_eq!(bars[1].close, None);
        assert_eq!(bars[1].volume, None);
    }

    #[test]
    fn test_chart_gmtoffset_moves_date() {
        // 2024-01-03 02:00 UTC is still Jan 2 in New York;
        // 2024-01-02 23:00 UTC is already Jan 3 in Tokyo
        let body = |ts: i64, offset: i64| {
            format!(
                r#"{{"chart":{{"result":[{{"meta":{{"gmtoffset":{offset}}},"timestamp":[{ts}],
                "indicators":{{"quote":[{{"close":[1.0],"volume":[1]}}]}}}}],"error":null}}}}"#
            )
        };

        let ny = parse_chart_response(&body(1704247200, -18000)).unwrap();
        assert_eq!(ny[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());

        let tokyo = parse_chart_response(&body(1704236400, 32400)).unwrap();
        assert_eq!(tokyo[0].date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());

        let utc = parse_chart_response(&body(1704247200, 0)).unwrap();
        assert_eq!(utc[0].date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    }

    #[test]
    fn test_chart_without_timestamps_is_empty() {
        let body = r#"{"chart":{"result":[{"meta":{},"indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(parse_chart_response(body).unwrap().is_empty());
    }

    #[test]
    fn test_chart_error_payload() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let err = parse_chart_response(body).unwrap_err();
        assert!(err.to_string().contains("Not Found"));
    }

    #[test]
    fn test_parse_profile_response_flattens_modules() {
        let body = r#"{"quoteSummary":{"result":[{
            "assetProfile":{"longBusinessSummary":"Tracks the S&P/TSX 60.","phone":null},
            "summaryDetail":{"totalAssets":{"raw":1.2e10,"fmt":"12B"},"yield":{}}
        }],"error":null}}"#;

        let info = parse_profile_response(body).unwrap();
        assert_eq!(info["longBusinessSummary"], "Tracks the S&P/TSX 60.");
        assert_eq!(info["totalAssets"].as_f64(), Some(1.2e10));
        assert!(!info.contains_key("phone"));
        assert!(!info.contains_key("yield"));
    }

    #[test]
    fn test_parse_crumb() {
        assert_eq!(parse_crumb("Ab1.cD/eF2\n").unwrap(), "Ab1.cD/eF2");
        assert!(parse_crumb("").is_err());
        assert!(parse_crumb("  \n").is_err());
        assert!(parse_crumb("<html><body>Too Many Requests</body></html>").is_err());
    }

    #[test]
    fn test_profile_error_payload() {
        let body = r#"{"quoteSummary":{"result":null,"error":{"code":"Not Found","description":"Quote not found"}}}"#;
        assert!(parse_profile_response(body).is_err());
    }
}
