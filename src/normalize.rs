use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::api_client::{DailyRecord, PinDailyRecord, PinRecord, TargetingRecord};
use crate::row::{MetricRow, Value};
use crate::window::DateWindow;

const MICRO_PER_DOLLAR: f64 = 1_000_000.0;

// Raw paid metric names mapped to the canonical column set kept on disk.
const PAID_RENAMES: &[(&str, &str)] = &[
    ("impression_1_gross", "impressions"),
    ("clickthrough_1", "clicks"),
    ("spend_in_micro_dollar", "spend_micro"),
    ("total_conversions", "conversions"),
    ("total_checkout", "checkouts"),
    ("total_checkout_value_in_micro_dollar", "checkout_value_micro"),
];

/// Flattens a raw metrics mapping into value cells, lower-casing every
/// metric name. A missing or malformed mapping yields an empty map; an
/// unreported metric is not zero.
pub fn metric_values(metrics: &Json) -> BTreeMap<String, Value> {
    let object = match metrics {
        Json::Object(map) => map.clone(),
        // The targeting endpoint sometimes returns the mapping as a
        // single-quoted JSON string.
        Json::String(raw) => {
            serde_json::from_str(&raw.replace('\'', "\"")).unwrap_or_default()
        }
        _ => serde_json::Map::new(),
    };

    let mut values = BTreeMap::new();
    for (name, raw) in &object {
        if let Some(value) = Value::from_json(raw) {
            values.insert(name.to_lowercase(), value);
        }
    }
    values
}

/// Converts targeting-analytics blocks into country-level rows keyed by
/// `date`, `country` and `campaign_id`. Micro-dollar amounts gain derived
/// dollar columns; the fetch window is recorded on every row.
pub fn country_rows(records: &[TargetingRecord], window: &DateWindow) -> Vec<MetricRow> {
    records
        .iter()
        .map(|record| {
            let mut values = metric_values(&record.metrics);

            for (from, to) in PAID_RENAMES {
                if let Some(value) = values.remove(*from) {
                    values.insert((*to).to_string(), value);
                }
            }
            if let Some(micro) = values.get("spend_micro").and_then(Value::as_f64) {
                values.insert("spend".to_string(), Value::Number(micro / MICRO_PER_DOLLAR));
            }
            if let Some(micro) = values.get("checkout_value_micro").and_then(Value::as_f64) {
                values.insert(
                    "checkout_value".to_string(),
                    Value::Number(micro / MICRO_PER_DOLLAR),
                );
            }

            values.insert(
                "targeting_type".to_string(),
                Value::Text(record.targeting_type.clone()),
            );
            values.insert(
                "date_range_start".to_string(),
                Value::Text(window.start.to_string()),
            );
            values.insert(
                "date_range_end".to_string(),
                Value::Text(window.end.to_string()),
            );

            let mut keys = BTreeMap::new();
            keys.insert("country".to_string(), record.targeting_value.clone());
            for key in ["date", "campaign_id"] {
                if let Some(value) = values.remove(key) {
                    keys.insert(key.to_string(), value.to_string());
                }
            }

            MetricRow { keys, values }
        })
        .collect()
}

/// Converts account-level daily blocks into rows keyed by `date`.
pub fn account_rows(records: &[DailyRecord]) -> Vec<MetricRow> {
    records
        .iter()
        .map(|record| {
            let mut values = metric_values(&record.metrics);
            if let Some(status) = &record.data_status {
                values.insert("data_status".to_string(), Value::Text(status.clone()));
            }

            let mut keys = BTreeMap::new();
            if let Some(date) = &record.date {
                keys.insert("date".to_string(), date.clone());
            }

            MetricRow { keys, values }
        })
        .collect()
}

/// Converts ranked-pin blocks into rows keyed by `pin_id`, preserving the
/// ranking order of the input.
pub fn pin_rows(records: &[PinRecord]) -> Vec<MetricRow> {
    records
        .iter()
        .map(|record| {
            let mut values = metric_values(&record.metrics);
            if let Some(status) = &record.data_status {
                values.insert("data_status".to_string(), Value::Text(status.clone()));
            }

            let mut keys = BTreeMap::new();
            if let Some(pin_id) = &record.pin_id {
                keys.insert("pin_id".to_string(), pin_id.clone());
            }

            MetricRow { keys, values }
        })
        .collect()
}

/// Converts per-pin daily blocks into rows keyed by `date` and `pin_id`.
pub fn pin_daily_rows(records: &[PinDailyRecord]) -> Vec<MetricRow> {
    records
        .iter()
        .map(|record| {
            let mut values = metric_values(&record.metrics);
            if let Some(status) = &record.data_status {
                values.insert("data_status".to_string(), Value::Text(status.clone()));
            }

            let mut keys = BTreeMap::new();
            keys.insert("pin_id".to_string(), record.pin_id.clone());
            if let Some(date) = &record.date {
                keys.insert("date".to_string(), date.clone());
            }

            MetricRow { keys, values }
        })
        .collect()
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

    #[test]
    fn test_metric_values_lowercases_names() {
        let values = metric_values(&serde_json::json!({
            "IMPRESSION": 120,
            "SAVE_RATE": 0.4,
            "DATA_STATUS": "READY",
        }));
        assert_eq!(values.get("impression"), Some(&Value::Number(120.0)));
        assert_eq!(values.get("save_rate"), Some(&Value::Number(0.4)));
        assert_eq!(
            values.get("data_status"),
            Some(&Value::Text("READY".to_string()))
        );
    }

    #[test]
    fn test_metric_values_missing_mapping_is_empty() {
        assert!(metric_values(&serde_json::Value::Null).is_empty());
        assert!(metric_values(&serde_json::json!([1, 2])).is_empty());
    }

    #[test]
    fn test_metric_values_parses_single_quoted_string() {
        let raw = serde_json::Value::String("{'IMPRESSION_1': 7}".to_string());
        let values = metric_values(&raw);
        assert_eq!(values.get("impression_1"), Some(&Value::Number(7.0)));
    }

    #[test]
    fn test_metric_values_unparseable_string_is_empty() {
        let raw = serde_json::Value::String("not a mapping".to_string());
        assert!(metric_values(&raw).is_empty());
    }

    #[test]
    fn test_country_rows_keys_and_dollar_conversion() {
        let records = vec![TargetingRecord {
            targeting_type: "COUNTRY".to_string(),
            targeting_value: "US".to_string(),
            metrics: serde_json::json!({
                "DATE": "2025-01-05",
                "CAMPAIGN_ID": 98765,
                "CAMPAIGN_NAME": "AWR Spring Push",
                "SPEND_IN_MICRO_DOLLAR": 2_500_000,
                "IMPRESSION_1_GROSS": 40,
                "CLICKTHROUGH_1": 4,
            }),
        }];

        let rows = country_rows(&records, &window());
        assert_eq!(rows.len(), 1);
        let row = &rows[0];

        assert_eq!(row.keys.get("date").map(String::as_str), Some("2025-01-05"));
        assert_eq!(row.keys.get("country").map(String::as_str), Some("US"));
        assert_eq!(row.keys.get("campaign_id").map(String::as_str), Some("98765"));

        assert_eq!(row.values.get("spend"), Some(&Value::Number(2.5)));
        assert_eq!(row.values.get("impressions"), Some(&Value::Number(40.0)));
        assert_eq!(row.values.get("clicks"), Some(&Value::Number(4.0)));
        assert_eq!(
            row.values.get("campaign_name"),
            Some(&Value::Text("AWR Spring Push".to_string()))
        );
        assert_eq!(
            row.values.get("date_range_start"),
            Some(&Value::Text("2025-01-01".to_string()))
        );
    }

    #[test]
    fn test_country_rows_without_date_leaves_key_absent() {
        let records = vec![TargetingRecord {
            targeting_type: "COUNTRY".to_string(),
            targeting_value: "DE".to_string(),
            metrics: serde_json::json!({"IMPRESSION_1": 3}),
        }];

        let rows = country_rows(&records, &window());
        assert!(rows[0].keys.get("date").is_none());
    }

    #[test]
    fn test_account_rows() {
        let records = vec![DailyRecord {
            date: Some("2025-02-01".to_string()),
            data_status: Some("READY".to_string()),
            metrics: serde_json::json!({"IMPRESSION": 11, "SAVE": 2}),
        }];

        let rows = account_rows(&records);
        assert_eq!(
            rows[0].keys.get("date").map(String::as_str),
            Some("2025-02-01")
        );
        assert_eq!(rows[0].values.get("impression"), Some(&Value::Number(11.0)));
        assert_eq!(
            rows[0].values.get("data_status"),
            Some(&Value::Text("READY".to_string()))
        );
    }

    #[test]
    fn test_pin_daily_rows_missing_metrics() {
        let records = vec![PinDailyRecord {
            pin_id: "p1".to_string(),
            date: Some("2025-02-01".to_string()),
            data_status: None,
            metrics: serde_json::Value::Null,
        }];

        let rows = pin_daily_rows(&records);
        assert_eq!(rows[0].keys.get("pin_id").map(String::as_str), Some("p1"));
        assert!(rows[0].values.is_empty());
    }
}
