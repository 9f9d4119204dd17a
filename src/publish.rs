use log::info;
use reqwest::{header::AUTHORIZATION, Client, RequestBuilder, Url};

use crate::config::Config;
use crate::error::Error;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Replaces the full contents of one destination tab with the given
    /// rectangular grid (header row first). An empty grid clears the tab
    /// and leaves it empty.
    /// # Arguments
    /// * `destination_id` - The spreadsheet to write to.
    /// * `tab` - The tab within it.
    /// * `values` - The rows to write, header first.
    async fn replace(
        &self,
        destination_id: &str,
        tab: &str,
        values: &[Vec<String>],
    ) -> Result<(), Error>;
}

/// Publishes tables through the Google Sheets values API.
#[derive(Debug)]
pub struct SheetsPublisher {
    client: Client,
    base_url: String,
    token: String,
}

impl SheetsPublisher {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let token = config.sheets_token.clone().ok_or_else(|| Error::Auth {
            message: "GOOGLE_SHEETS_TOKEN is not set".to_string(),
        })?;
        Ok(SheetsPublisher {
            client: Client::new(),
            base_url: config.sheets_api_url.clone(),
            token,
        })
    }

    fn values_url(&self, destination_id: &str, range: &str) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .extend(&["v4", "spreadsheets", destination_id, "values", range]);
        Ok(url)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(), Error> {
        let resp = request
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Publish { status, body });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Publisher for SheetsPublisher {
    async fn replace(
        &self,
        destination_id: &str,
        tab: &str,
        values: &[Vec<String>],
    ) -> Result<(), Error> {
        // Clear first so rows beyond the new extent do not linger
        let clear_url = self.values_url(destination_id, &format!("{}!A:Z:clear", tab))?;
        self.execute(self.client.post(clear_url)).await?;

        if values.is_empty() {
            info!("cleared '{}' ({})", tab, destination_id);
            return Ok(());
        }

        let update_url = self.values_url(destination_id, &format!("{}!A1", tab))?;
        let body = serde_json::json!({ "values": values });
        self.execute(
            self.client
                .put(update_url)
                .query(&[("valueInputOption", "RAW")])
                .json(&body),
        )
        .await?;

        info!(
            "uploaded {} rows to '{}' ({})",
            values.len().saturating_sub(1),
            tab,
            destination_id
        );
        Ok(())
    }
}
