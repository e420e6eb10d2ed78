//! Per-vCenter monitoring alarm defaults.
//!
//! Hash key `metric_type_vcenter` is `monitoring_{vcenter}`, range key is the
//! guest OS type. Each row carries a threshold/period pair for every alarm
//! category.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::aws::dynamo::{self, DynamoClient};
use crate::store::StoreError;

pub const OS_TYPES: &[&str] = &["windows", "linux"];
pub const ALARM_CATEGORIES: &[&str] = &[
    "alarms_disk_free_space",
    "alarms_disk_used_percent",
    "alarms_memory",
    "alarms_cpu",
];

const METRIC_TYPE: &str = "monitoring";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSetting {
    pub threshold: i64,
    pub period: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub os_type: String,
    pub alarms: BTreeMap<String, AlarmSetting>,
}

pub struct MetricsStore {
    dynamo: DynamoClient,
    table: String,
}

impl MetricsStore {
    pub fn new(dynamo: DynamoClient, table: &str) -> Self {
        MetricsStore {
            dynamo,
            table: table.to_string(),
        }
    }

    fn hash_key(vcenter: &str) -> String {
        format!("{METRIC_TYPE}_{vcenter}")
    }

    fn validate_os(os_type: &str) -> Result<(), StoreError> {
        if OS_TYPES.contains(&os_type) {
            Ok(())
        } else {
            Err(StoreError::Validation(format!(
                "invalid os type {os_type}, expected one of {OS_TYPES:?}"
            )))
        }
    }

    fn validate_categories(alarms: &BTreeMap<String, AlarmSetting>) -> Result<(), StoreError> {
        for category in alarms.keys() {
            if !ALARM_CATEGORIES.contains(&category.as_str()) {
                return Err(StoreError::Validation(format!(
                    "unknown alarm category {category}"
                )));
            }
        }
        Ok(())
    }

    fn alarm_attribute(setting: &AlarmSetting) -> Value {
        json!({ "M": {
            "threshold": dynamo::n(setting.threshold),
            "period": dynamo::n(setting.period),
        }})
    }

    fn parse_row(item: &Value) -> Option<MetricsRecord> {
        let os_type = item["os_type"]["S"].as_str()?.to_string();
        let mut alarms = BTreeMap::new();
        for category in ALARM_CATEGORIES {
            let attribute = &item[category]["M"];
            if let (Some(threshold), Some(period)) = (
                attribute["threshold"]["N"].as_str().and_then(|n| n.parse().ok()),
                attribute["period"]["N"].as_str().and_then(|n| n.parse().ok()),
            ) {
                alarms.insert(
                    category.to_string(),
                    AlarmSetting { threshold, period },
                );
            }
        }
        Some(MetricsRecord { os_type, alarms })
    }

    /// Create the metrics row for one (vcenter, os) pair. All four alarm
    /// categories are required; an existing row is a conflict.
    pub async fn create(
        &self,
        vcenter: &str,
        os_type: &str,
        alarms: &BTreeMap<String, AlarmSetting>,
    ) -> Result<(), StoreError> {
        Self::validate_os(os_type)?;
        Self::validate_categories(alarms)?;
        for category in ALARM_CATEGORIES {
            if !alarms.contains_key(*category) {
                return Err(StoreError::Validation(format!(
                    "missing alarm category {category}"
                )));
            }
        }

        let mut item = json!({
            "metric_type_vcenter": dynamo::s(&Self::hash_key(vcenter)),
            "os_type": dynamo::s(os_type),
        });
        for (category, setting) in alarms {
            item[category.as_str()] = Self::alarm_attribute(setting);
        }

        let result = self
            .dynamo
            .put_item(&self.table, item, Some("attribute_not_exists(os_type)"))
            .await;

        match result {
            Ok(()) => {
                info!(vcenter, os_type, "stored monitoring metrics");
                Ok(())
            }
            Err(error) if error.is("ConditionalCheckFailedException") => Err(StoreError::Conflict(
                format!("metrics for {vcenter}/{os_type}"),
            )),
            Err(error) => Err(error.into()),
        }
    }

    /// All os rows for a vcenter.
    pub async fn read(&self, vcenter: &str) -> Result<Vec<MetricsRecord>, StoreError> {
        let items = self
            .dynamo
            .query(
                &self.table,
                "metric_type_vcenter = :pk",
                None,
                json!({ ":pk": dynamo::s(&Self::hash_key(vcenter)) }),
            )
            .await?;
        Ok(items.iter().filter_map(Self::parse_row).collect())
    }

    pub async fn read_by_os(
        &self,
        vcenter: &str,
        os_type: &str,
    ) -> Result<Option<MetricsRecord>, StoreError> {
        Self::validate_os(os_type)?;
        let item = self
            .dynamo
            .get_item(
                &self.table,
                json!({
                    "metric_type_vcenter": dynamo::s(&Self::hash_key(vcenter)),
                    "os_type": dynamo::s(os_type),
                }),
            )
            .await?;
        Ok(item.as_ref().and_then(Self::parse_row))
    }

    /// Update only the provided categories; the row must already exist.
    pub async fn update(
        &self,
        vcenter: &str,
        os_type: &str,
        alarms: &BTreeMap<String, AlarmSetting>,
    ) -> Result<(), StoreError> {
        Self::validate_os(os_type)?;
        Self::validate_categories(alarms)?;
        if alarms.is_empty() {
            return Err(StoreError::Validation(
                "no alarm categories to update".to_string(),
            ));
        }

        let mut assignments = Vec::new();
        let mut names = serde_json::Map::new();
        let mut values = serde_json::Map::new();
        for (index, (category, setting)) in alarms.iter().enumerate() {
            assignments.push(format!("#c{index} = :v{index}"));
            names.insert(format!("#c{index}"), Value::String(category.clone()));
            values.insert(format!(":v{index}"), Self::alarm_attribute(setting));
        }

        let result = self
            .dynamo
            .update_item(
                &self.table,
                json!({
                    "metric_type_vcenter": dynamo::s(&Self::hash_key(vcenter)),
                    "os_type": dynamo::s(os_type),
                }),
                &format!("SET {}", assignments.join(", ")),
                Some(Value::Object(names)),
                Value::Object(values),
                Some("attribute_exists(os_type)"),
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(error) if error.is("ConditionalCheckFailedException") => Err(StoreError::NotFound(
                format!("metrics for {vcenter}/{os_type}"),
            )),
            Err(error) => Err(error.into()),
        }
    }

    /// Remove every os row for a vcenter. Idempotent.
    pub async fn delete(&self, vcenter: &str) -> Result<(), StoreError> {
        for record in self.read(vcenter).await? {
            self.dynamo
                .delete_item(
                    &self.table,
                    json!({
                        "metric_type_vcenter": dynamo::s(&Self::hash_key(vcenter)),
                        "os_type": dynamo::s(&record.os_type),
                    }),
                )
                .await?;
        }
        Ok(())
    }
}
