use crate::config::Config;
use crate::error::Error;
use crate::window::DateWindow;
use log::debug;
use reqwest::{
    header::{ACCEPT, AUTHORIZATION},
    Client, Url,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;

const PAID_COLUMNS: &[&str] = &[
    "CAMPAIGN_ID",
    "CAMPAIGN_NAME",
    "SPEND_IN_MICRO_DOLLAR",
    "IMPRESSION_1",
    "CLICKTHROUGH_1",
    "TOTAL_CHECKOUT",
    "TOTAL_CHECKOUT_VALUE_IN_MICRO_DOLLAR",
    "TOTAL_CONVERSIONS",
];

const ACCOUNT_METRICS: &[&str] = &[
    "IMPRESSION",
    "OUTBOUND_CLICK",
    "PIN_CLICK",
    "SAVE",
    "SAVE_RATE",
    "OUTBOUND_CLICK_RATE",
];

const PIN_METRICS: &[&str] = &["IMPRESSION", "OUTBOUND_CLICK", "PIN_CLICK", "SAVE"];

const VIDEO_PIN_METRICS: &[&str] = &[
    "IMPRESSION",
    "OUTBOUND_CLICK",
    "PIN_CLICK",
    "SAVE",
    "VIDEO_MRC_VIEW",
    "VIDEO_AVG_WATCH_TIME",
    "VIDEO_V50_WATCH_TIME",
];

// API-side caps on the ranking and batch endpoints.
const MAX_TOP_PINS: u32 = 50;
const MAX_PINS_PER_CALL: usize = 100;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AnalyticsApi: Send + Sync + 'static {
    /// Fetches the ad account's campaigns.
    /// # Returns
    /// A Result containing either the campaign list or an Error; an account
    /// without campaigns is reported as `NoData`.
    async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error>;

    /// Fetches daily paid metrics with a country breakdown for the given
    /// campaigns over one date window.
    /// # Arguments
    /// * `campaign_ids` - Campaigns to include.
    /// * `window` - The date window; the endpoint rejects spans over 90 days.
    async fn fetch_country_analytics(
        &self,
        campaign_ids: &[String],
        window: &DateWindow,
    ) -> Result<Vec<TargetingRecord>, Error>;

    /// Fetches daily organic metrics at the account level.
    async fn fetch_account_analytics(&self, window: &DateWindow)
        -> Result<Vec<DailyRecord>, Error>;

    /// Fetches the top organic pins ranked by `sort_by` over the window.
    async fn fetch_top_pins(
        &self,
        window: &DateWindow,
        sort_by: &str,
        num_of_pins: u32,
    ) -> Result<Vec<PinRecord>, Error>;

    /// Fetches the top organic video pins ranked by `sort_by` over the window.
    async fn fetch_top_video_pins(
        &self,
        window: &DateWindow,
        sort_by: &str,
        num_of_pins: u32,
    ) -> Result<Vec<PinRecord>, Error>;

    /// Fetches daily metrics for up to 100 pins in one call, flattened to
    /// one record per pin per day.
    async fn fetch_pin_analytics(
        &self,
        pin_ids: &[String],
        window: &DateWindow,
    ) -> Result<Vec<PinDailyRecord>, Error>;
}

#[derive(Deserialize, Debug, Clone)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Deserialize)]
struct CampaignPage {
    #[serde(default)]
    items: Vec<Campaign>,
}

/// One targeting-analytics block: the targeted dimension plus its metrics
/// mapping. The mapping occasionally arrives as a JSON-encoded string, so it
/// is kept raw here and decoded during normalization.
#[derive(Deserialize, Debug, Clone)]
pub struct TargetingRecord {
    #[serde(default)]
    pub targeting_type: String,
    #[serde(default)]
    pub targeting_value: String,
    #[serde(default)]
    pub metrics: serde_json::Value,
}

#[derive(Deserialize)]
struct TargetingAnalyticsResponse {
    #[serde(default)]
    data: Vec<TargetingRecord>,
}

/// One day of metrics for an account or a pin.
#[derive(Deserialize, Debug, Clone)]
pub struct DailyRecord {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub data_status: Option<String>,
    #[serde(default)]
    pub metrics: serde_json::Value,
}

#[derive(Deserialize)]
struct SplitMetrics {
    #[serde(default)]
    daily_metrics: Vec<DailyRecord>,
}

#[derive(Deserialize)]
struct AccountAnalyticsResponse {
    #[serde(default)]
    all: Option<SplitMetrics>,
}

/// Aggregate metrics for one pin over the whole requested window.
#[derive(Deserialize, Debug, Clone)]
pub struct PinRecord {
    #[serde(default)]
    pub pin_id: Option<String>,
    #[serde(default)]
    pub data_status: Option<String>,
    #[serde(default)]
    pub metrics: serde_json::Value,
}

#[derive(Deserialize)]
struct TopPinsResponse {
    #[serde(default)]
    pins: Vec<PinRecord>,
}

#[derive(Deserialize)]
struct PinDailySeries {
    #[serde(default)]
    pin_id: Option<String>,
    #[serde(default)]
    daily_metrics: Vec<DailyRecord>,
}

#[derive(Deserialize)]
struct PinsAnalyticsResponse {
    #[serde(default)]
    pins: Vec<PinDailySeries>,
}

/// One day of metrics for one pin, flattened out of the batch response.
#[derive(Debug, Clone)]
pub struct PinDailyRecord {
    pub pin_id: String,
    pub date: Option<String>,
    pub data_status: Option<String>,
    pub metrics: serde_json::Value,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    ad_account_id: String,
    token: String,
}

impl ApiClient {
    pub fn new(config: &Config, token: String) -> Self {
        ApiClient {
            client: Client::new(),
            base_url: config.api_url.to_string(),
            ad_account_id: config.ad_account_id.to_string(),
            token,
        }
    }

    // Construct the URL safely
    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http { status, body });
        }

        Ok(resp.json::<T>().await?)
    }
}

#[async_trait::async_trait]
impl AnalyticsApi for ApiClient {
    async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error> {
        let mut url = self.endpoint(&["ad_accounts", &self.ad_account_id, "campaigns"])?;
        url.query_pairs_mut().append_pair("page_size", "100");

        let page: CampaignPage = self.get_json(url).await?;

        if page.items.is_empty() {
            return Err(Error::NoData {
                message: "No campaigns found for processing".to_string(),
            });
        }

        Ok(page.items)
    }

    async fn fetch_country_analytics(
        &self,
        campaign_ids: &[String],
        window: &DateWindow,
    ) -> Result<Vec<TargetingRecord>, Error> {
        let mut url = self.endpoint(&[
            "ad_accounts",
            &self.ad_account_id,
            "campaigns",
            "targeting_analytics",
        ])?;
        url.query_pairs_mut()
            .append_pair("campaign_ids", &campaign_ids.join(","))
            .append_pair("start_date", &window.start.to_string())
            .append_pair("end_date", &window.end.to_string())
            .append_pair("targeting_types", "COUNTRY")
            .append_pair("granularity", "DAY")
            .append_pair("columns", &PAID_COLUMNS.join(","))
            .append_pair("click_window_days", "7")
            .append_pair("engagement_window_days", "30")
            .append_pair("view_window_days", "1")
            .append_pair("conversion_report_time", "TIME_OF_AD_ACTION");

        let response: TargetingAnalyticsResponse = self.get_json(url).await?;
        Ok(response.data)
    }

    async fn fetch_account_analytics(
        &self,
        window: &DateWindow,
    ) -> Result<Vec<DailyRecord>, Error> {
        let mut url = self.endpoint(&["user_account", "analytics"])?;
        url.query_pairs_mut()
            .append_pair("start_date", &window.start.to_string())
            .append_pair("end_date", &window.end.to_string())
            .append_pair("metric_types", &ACCOUNT_METRICS.join(","))
            .append_pair("split_field", "NO_SPLIT")
            .append_pair("app_types", "ALL");

        let response: AccountAnalyticsResponse = self.get_json(url).await?;
        Ok(response.all.map(|split| split.daily_metrics).unwrap_or_default())
    }

    async fn fetch_top_pins(
        &self,
        window: &DateWindow,
        sort_by: &str,
        num_of_pins: u32,
    ) -> Result<Vec<PinRecord>, Error> {
        let mut url = self.endpoint(&["user_account", "analytics", "top_pins"])?;
        url.query_pairs_mut()
            .append_pair("start_date", &window.start.to_string())
            .append_pair("end_date", &window.end.to_string())
            .append_pair("sort_by", sort_by)
            .append_pair("metric_types", &PIN_METRICS.join(","))
            .append_pair("num_of_pins", &num_of_pins.min(MAX_TOP_PINS).to_string());

        let response: TopPinsResponse = self.get_json(url).await?;
        Ok(response.pins)
    }

    async fn fetch_top_video_pins(
        &self,
        window: &DateWindow,
        sort_by: &str,
        num_of_pins: u32,
    ) -> Result<Vec<PinRecord>, Error> {
        let mut url = self.endpoint(&["user_account", "analytics", "top_video_pins"])?;
        url.query_pairs_mut()
            .append_pair("start_date", &window.start.to_string())
            .append_pair("end_date", &window.end.to_string())
            .append_pair("sort_by", sort_by)
            .append_pair("metric_types", &VIDEO_PIN_METRICS.join(","))
            .append_pair("num_of_pins", &num_of_pins.min(MAX_TOP_PINS).to_string());

        let response: TopPinsResponse = self.get_json(url).await?;
        Ok(response.pins)
    }

    async fn fetch_pin_analytics(
        &self,
        pin_ids: &[String],
        window: &DateWindow,
    ) -> Result<Vec<PinDailyRecord>, Error> {
        let batch = &pin_ids[..pin_ids.len().min(MAX_PINS_PER_CALL)];

        let mut url = self.endpoint(&["pins", "analytics"])?;
        url.query_pairs_mut()
            .append_pair("pin_ids", &batch.join(","))
            .append_pair("start_date", &window.start.to_string())
            .append_pair("end_date", &window.end.to_string())
            .append_pair("metric_types", &PIN_METRICS.join(","))
            .append_pair("app_types", "ALL");

        let response: PinsAnalyticsResponse = self.get_json(url).await?;

        let mut records = Vec::new();
        for series in response.pins {
            let pin_id = series.pin_id.unwrap_or_default();
            for daily in series.daily_metrics {
                records.push(PinDailyRecord {
                    pin_id: pin_id.clone(),
                    date: daily.date,
                    data_status: daily.data_status,
                    metrics: daily.metrics,
                });
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn window() -> DateWindow {
        DateWindow {
            start: chrono::NaiveDate::from_str("2025-01-01").unwrap(),
            end: chrono::NaiveDate::from_str("2025-03-31").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_fetch_country_analytics_invalid_url() {
        let mut config = Config::test_default();
        config.api_url = "invalid_url".to_string();
        let client = ApiClient::new(&config, "test_token".to_string());

        let result = client
            .fetch_country_analytics(&["456".to_string()], &window())
            .await;
        assert!(matches!(result.unwrap_err(), Error::UrlParsingFailed(_)));
    }

    #[tokio::test]
    async fn test_fetch_campaigns_invalid_url() {
        let mut config = Config::test_default();
        config.api_url = "invalid_url".to_string();
        let client = ApiClient::new(&config, "test_token".to_string());

        let result = client.fetch_campaigns().await;
        assert!(matches!(result.unwrap_err(), Error::UrlParsingFailed(_)));
    }

    #[tokio::test]
    async fn test_fetch_pin_analytics_invalid_url() {
        let mut config = Config::test_default();
        config.api_url = "invalid_url".to_string();
        let client = ApiClient::new(&config, "test_token".to_string());

        let result = client
            .fetch_pin_analytics(&["789".to_string()], &window())
            .await;
        assert!(matches!(result.unwrap_err(), Error::UrlParsingFailed(_)));
    }
}
