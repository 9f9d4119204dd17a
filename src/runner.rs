use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use log::{error, info, warn};

use crate::api_client::{AnalyticsApi, ApiClient};
use crate::config::Config;
use crate::error::Error;
use crate::normalize;
use crate::publish::{Publisher, SheetsPublisher};
use crate::rollup::{build_rollup, CategoryRule, GroupColumn, GroupSource, SumColumn};
use crate::row::{self, MetricRow, Table};
use crate::store::{self, HistoricalStore};
use crate::token::{FileTokenProvider, TokenProvider};
use crate::window::{plan_windows, DateWindow};

// The targeting and organic analytics endpoints reject ranges over 90 days.
const MAX_WINDOW_DAYS: u32 = 89;
const PIN_BATCH_SIZE: usize = 100;

const COUNTRY_KEY_COLUMNS: &[&str] = &["date", "country", "campaign_id"];
const ACCOUNT_KEY_COLUMNS: &[&str] = &["date"];
const PIN_KEY_COLUMNS: &[&str] = &["date", "pin_id"];

const COUNTRY_HISTORY_FILE: &str = "pinterest_country_historical.csv";
const ACCOUNT_HISTORY_FILE: &str = "pinterest_organic_account_historical.csv";
const PIN_HISTORY_FILE: &str = "pinterest_organic_pins_historical.csv";
const TOP_PINS_FILE: &str = "pinterest_organic_top_pins.csv";
const TOP_VIDEOS_FILE: &str = "pinterest_organic_top_videos.csv";

const DAILY_ROLLUP_TAB: &str = "Daily Paid Metrics By Country";
const ROLLUP_SORT: &[&str] = &["date", "country_code", "campaign_type"];

/// Fetches paid country-level metrics for the date range, merges them into
/// the historical store and publishes the results when a sheet is
/// configured.
pub async fn run_paid_report(
    config: Config,
    start: &NaiveDate,
    end: &NaiveDate,
) -> Result<(), Error> {
    if start > end {
        return Err(Error::StartDateAfterEndDate {
            start_date: start.to_string(),
            end_date: end.to_string(),
        });
    }

    let token = FileTokenProvider::new(&config).get_valid_token().await?;
    let api = ApiClient::new(&config, token);

    let campaigns = api.fetch_campaigns().await?;
    info!("found {} campaigns", campaigns.len());
    let campaign_ids: Vec<String> = campaigns.into_iter().map(|campaign| campaign.id).collect();

    let windows = plan_windows(start, end, MAX_WINDOW_DAYS)?;
    info!("splitting {} to {} into {} windows", start, end, windows.len());

    let rows =
        fetch_country_windows(&api, &campaign_ids, &windows, config.request_pause_ms).await;
    if rows.is_empty() {
        return Err(Error::NoData {
            message: "No country-level data retrieved".to_string(),
        });
    }

    let store = HistoricalStore::new(
        Path::new(&config.store_dir).join(COUNTRY_HISTORY_FILE),
        COUNTRY_KEY_COLUMNS,
    );
    let (table, summary) = store.merge(rows)?;
    info!(
        "historical table: {} kept, {} superseded, {} total rows",
        summary.kept_rows, summary.superseded_rows, summary.total_rows
    );

    let Some(sheet_id) = config.sheet_id.clone() else {
        info!("no destination sheet configured, skipping upload");
        return Ok(());
    };
    let publisher = SheetsPublisher::new(&config)?;
    publish_paid_outputs(
        &publisher,
        &sheet_id,
        &config.sheet_tab,
        &table,
        store.key_columns(),
    )
    .await
}

/// Fetches organic account and pin metrics for the date range and merges
/// them into their historical stores; top-pin rankings are snapshotted
/// alongside.
pub async fn run_organic_report(
    config: Config,
    start: &NaiveDate,
    end: &NaiveDate,
) -> Result<(), Error> {
    if start > end {
        return Err(Error::StartDateAfterEndDate {
            start_date: start.to_string(),
            end_date: end.to_string(),
        });
    }

    let token = FileTokenProvider::new(&config).get_valid_token().await?;
    let api = ApiClient::new(&config, token);

    let windows = plan_windows(start, end, MAX_WINDOW_DAYS)?;
    let store_dir = Path::new(&config.store_dir);

    let account_rows = fetch_account_windows(&api, &windows, config.request_pause_ms).await;
    if account_rows.is_empty() {
        warn!("no account analytics retrieved");
    } else {
        let store = HistoricalStore::new(
            store_dir.join(ACCOUNT_HISTORY_FILE),
            ACCOUNT_KEY_COLUMNS,
        );
        let (_, summary) = store.merge(account_rows)?;
        info!(
            "account history: {} kept, {} superseded, {} total rows",
            summary.kept_rows, summary.superseded_rows, summary.total_rows
        );
    }

    pause(config.request_pause_ms).await;

    // Rankings cannot span windows; use the most recent one.
    let Some(recent) = windows.last() else {
        return Ok(());
    };

    let top_pins = api
        .fetch_top_pins(recent, &config.sort_metric, config.max_pins)
        .await?;
    if top_pins.is_empty() {
        warn!("no top pins retrieved");
        return Ok(());
    }
    let top_rows = normalize::pin_rows(&top_pins);
    store::write_snapshot(&store_dir.join(TOP_PINS_FILE), &top_rows, &["pin_id"])?;
    info!("saved {} top pins", top_rows.len());

    let pin_ids: Vec<String> = top_rows
        .iter()
        .filter_map(|row| row.keys.get("pin_id").cloned())
        .collect();

    let pin_daily_rows =
        fetch_pin_windows(&api, &pin_ids, &windows, config.request_pause_ms).await;
    if pin_daily_rows.is_empty() {
        warn!("no pin-level daily metrics retrieved");
    } else {
        let store = HistoricalStore::new(store_dir.join(PIN_HISTORY_FILE), PIN_KEY_COLUMNS);
        let (_, summary) = store.merge(pin_daily_rows)?;
        info!(
            "pin history: {} kept, {} superseded, {} total rows",
            summary.kept_rows, summary.superseded_rows, summary.total_rows
        );
    }

    pause(config.request_pause_ms).await;

    match api
        .fetch_top_video_pins(recent, &config.sort_metric, config.max_pins)
        .await
    {
        Ok(videos) if !videos.is_empty() => {
            let video_rows = normalize::pin_rows(&videos);
            store::write_snapshot(&store_dir.join(TOP_VIDEOS_FILE), &video_rows, &["pin_id"])?;
            info!("saved {} top video pins", video_rows.len());
        }
        Ok(_) => warn!("no top video pins retrieved"),
        // accounts without video content are common; not fatal
        Err(err) => error!("fetching top video pins failed: {}", err),
    }

    Ok(())
}

/// Fetches country analytics window by window. A failed window is logged
/// and skipped so the remaining windows still run.
async fn fetch_country_windows(
    api: &impl AnalyticsApi,
    campaign_ids: &[String],
    windows: &[DateWindow],
    pause_ms: u64,
) -> Vec<MetricRow> {
    let mut rows = Vec::new();
    for (i, window) in windows.iter().enumerate() {
        info!("[{}/{}] fetching country data for {}", i + 1, windows.len(), window);
        match api.fetch_country_analytics(campaign_ids, window).await {
            Ok(records) => {
                info!("retrieved {} records", records.len());
                rows.extend(normalize::country_rows(&records, window));
            }
            Err(err) => error!("fetching {} failed: {}", window, err),
        }
        if i + 1 < windows.len() {
            pause(pause_ms).await;
        }
    }
    rows
}

async fn fetch_account_windows(
    api: &impl AnalyticsApi,
    windows: &[DateWindow],
    pause_ms: u64,
) -> Vec<MetricRow> {
    let mut rows = Vec::new();
    for (i, window) in windows.iter().enumerate() {
        info!("[{}/{}] fetching account analytics for {}", i + 1, windows.len(), window);
        match api.fetch_account_analytics(window).await {
            Ok(records) => rows.extend(normalize::account_rows(&records)),
            Err(err) => error!("fetching {} failed: {}", window, err),
        }
        if i + 1 < windows.len() {
            pause(pause_ms).await;
        }
    }
    rows
}

async fn fetch_pin_windows(
    api: &impl AnalyticsApi,
    pin_ids: &[String],
    windows: &[DateWindow],
    pause_ms: u64,
) -> Vec<MetricRow> {
    let mut rows = Vec::new();
    for batch in pin_ids.chunks(PIN_BATCH_SIZE) {
        for (i, window) in windows.iter().enumerate() {
            match api.fetch_pin_analytics(batch, window).await {
                Ok(records) => rows.extend(normalize::pin_daily_rows(&records)),
                Err(err) => error!("fetching pin metrics for {} failed: {}", window, err),
            }
            if i + 1 < windows.len() {
                pause(pause_ms).await;
            }
        }
    }
    rows
}

/// Publishes the merged historical table and its daily rollup.
async fn publish_paid_outputs(
    publisher: &impl Publisher,
    sheet_id: &str,
    tab: &str,
    table: &Table,
    key_columns: &[String],
) -> Result<(), Error> {
    publisher
        .replace(sheet_id, tab, &row::to_values(table, key_columns))
        .await?;

    let rollup = build_rollup(table, &rollup_groups(), &rollup_sums(), ROLLUP_SORT).await?;
    publisher.replace(sheet_id, DAILY_ROLLUP_TAB, &rollup).await
}

fn rollup_groups() -> Vec<GroupColumn> {
    vec![
        GroupColumn {
            name: "date".to_string(),
            source: GroupSource::Column("date".to_string()),
        },
        GroupColumn {
            name: "campaign_type".to_string(),
            source: GroupSource::Category(CategoryRule {
                source: "campaign_name".to_string(),
                marker: "AWR".to_string(),
                matched: "Awareness".to_string(),
                fallback: "Conversion".to_string(),
            }),
        },
        GroupColumn {
            name: "country_code".to_string(),
            source: GroupSource::Column("country".to_string()),
        },
    ]
}

fn rollup_sums() -> Vec<SumColumn> {
    let columns: &[(&str, &[&str])] = &[
        ("impression", &["impressions", "impression_1"]),
        ("clicks", &["clicks", "clickthrough_1"]),
        ("spend", &["spend"]),
        ("purchase", &["checkouts", "total_checkout"]),
        ("revenue", &["checkout_value", "total_checkout_value_in_dollar"]),
    ];
    columns
        .iter()
        .map(|(name, candidates)| SumColumn {
            name: name.to_string(),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
        })
        .collect()
}

async fn pause(pause_ms: u64) {
    if pause_ms > 0 {
        tokio::time::sleep(Duration::from_millis(pause_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::{MockAnalyticsApi, TargetingRecord};
    use crate::publish::MockPublisher;
    use crate::row::Value;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn record(date: &str, campaign_id: &str) -> TargetingRecord {
        TargetingRecord {
            targeting_type: "COUNTRY".to_string(),
            targeting_value: "US".to_string(),
            metrics: serde_json::json!({
                "DATE": date,
                "CAMPAIGN_ID": campaign_id,
                "CAMPAIGN_NAME": "Checkout push",
                "IMPRESSION_1": 3,
            }),
        }
    }

    #[tokio::test]
    async fn test_failed_window_is_skipped() {
        let windows = plan_windows(&date("2025-01-01"), &date("2025-06-30"), 89).unwrap();
        assert_eq!(windows.len(), 3);
        let failing = windows[1].start;

        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_country_analytics()
            .times(3)
            .returning(move |_, window| {
                if window.start == failing {
                    Err(Error::Http {
                        status: reqwest::StatusCode::TOO_MANY_REQUESTS,
                        body: "slow down".to_string(),
                    })
                } else {
                    Ok(vec![record(&window.start.to_string(), "c1")])
                }
            });

        let rows = fetch_country_windows(&api, &["c1".to_string()], &windows, 0).await;

        // the middle window is lost, the other two still land
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].keys.get("date").map(String::as_str),
            Some("2025-01-01")
        );
    }

    #[tokio::test]
    async fn test_pin_windows_batches_and_continues() {
        let windows = plan_windows(&date("2025-01-01"), &date("2025-03-31"), 89).unwrap();
        let pin_ids: Vec<String> = (0..150).map(|i| format!("p{}", i)).collect();

        let mut api = MockAnalyticsApi::new();
        // 150 pins over one window means two batches
        api.expect_fetch_pin_analytics()
            .times(2)
            .returning(|batch, _| {
                assert!(batch.len() <= PIN_BATCH_SIZE);
                Ok(Vec::new())
            });

        let rows = fetch_pin_windows(&api, &pin_ids, &windows, 0).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_publish_paid_outputs_sends_both_tables() {
        let mut keys = BTreeMap::new();
        keys.insert("date".to_string(), "2025-01-01".to_string());
        keys.insert("country".to_string(), "US".to_string());
        keys.insert("campaign_id".to_string(), "c1".to_string());
        let mut values = BTreeMap::new();
        values.insert(
            "campaign_name".to_string(),
            Value::Text("AWR push".to_string()),
        );
        for metric in ["impressions", "clicks", "spend", "checkouts", "checkout_value"] {
            values.insert(metric.to_string(), Value::Number(1.0));
        }
        let table = vec![MetricRow { keys, values }];

        let mut publisher = MockPublisher::new();
        publisher
            .expect_replace()
            .withf(|_, tab, values| tab == "Paid Metrics By Country" && values.len() == 2)
            .times(1)
            .returning(|_, _, _| Ok(()));
        publisher
            .expect_replace()
            .withf(|_, tab, values| tab == DAILY_ROLLUP_TAB && values.len() == 2)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let key_columns: Vec<String> =
            COUNTRY_KEY_COLUMNS.iter().map(|c| c.to_string()).collect();
        publish_paid_outputs(
            &publisher,
            "sheet-1",
            "Paid Metrics By Country",
            &table,
            &key_columns,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_publish_error_propagates() {
        let mut keys = BTreeMap::new();
        keys.insert("date".to_string(), "2025-01-01".to_string());
        let table = vec![MetricRow {
            keys,
            values: BTreeMap::new(),
        }];

        let mut publisher = MockPublisher::new();
        publisher.expect_replace().times(1).returning(|_, _, _| {
            Err(Error::Publish {
                status: reqwest::StatusCode::FORBIDDEN,
                body: "no access".to_string(),
            })
        });

        let result = publish_paid_outputs(
            &publisher,
            "sheet-1",
            "Paid Metrics By Country",
            &table,
            &["date".to_string()],
        )
        .await;
        assert!(matches!(result.unwrap_err(), Error::Publish { .. }));
    }
}
