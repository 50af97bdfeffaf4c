use crate::config::ScraperConfig;
use crate::scraper::error::ScrapeError;
use reqwest::header;
use std::time::Duration;
use tracing::debug;

/// Thin wrapper over one shared `reqwest::Client`.
///
/// Requests are single-shot: throttling happens in the pipeline, and a
/// non-success status is returned as an error for the caller to classify.
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Yahoo sets consent cookies on the first page hit
            .cookie_store(true)
            .build()?;

        Ok(Self { inner })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ScrapeError> {
        debug!("GET {}", url);
        let resp = self
            .inner
            .get(url)
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }

    /// Hit a URL only for the cookies it sets. The status is not checked:
    /// Yahoo's cookie endpoint answers 404 while still setting the session.
    pub async fn touch(&self, url: &str) -> Result<(), ScrapeError> {
        debug!("GET {} (cookies)", url);
        self.inner
            .get(url)
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;
        Ok(())
    }

    /// Fetch a URL as text.
    pub async fn get_text(&self, url: &str) -> Result<String, ScrapeError> {
        Ok(self.get(url).await?.text().await?)
    }
}
