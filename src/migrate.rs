use anyhow::Result;
use serde_json::{json, Value};
use tracing::info;

use crate::config::Config;
use crate::sink_elastic::ElasticsearchSink;

/// Settings and mappings for the computer index.
pub fn index_definition() -> Value {
    json!({
        "mappings": {
            "properties": {
                "computer_name": { "type": "keyword" },
                "exists_in_ocs": { "type": "boolean" },
                "exists_in_ad": { "type": "boolean" },
                "ocs_status": { "type": "keyword" },
                "ad_status": { "type": "keyword" },
                "ocs_last_inventory": { "type": "keyword" },
                "ocs_last_come": { "type": "keyword" },
                "ad_last_logon_time": { "type": "keyword" },
                "ad_last_modified_time": { "type": "keyword" },
                "ad_not_login_more_than_30d": { "type": "boolean" },
                "ad_not_login_more_than_45d": { "type": "boolean" },
                "ocs_last_inventory_more_than_30d": { "type": "boolean" },
                "ocs_last_come_more_than_30d": { "type": "boolean" },
                "ocs_last_come_more_than_45d": { "type": "boolean" },
                "ocs_inactive_duration_days": { "type": "integer" },
                "ad_inactive_duration_days": { "type": "integer" },
                "@timestamp": { "type": "date" }
            }
        }
    })
}

/// Create the index if it does not exist. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<bool> {
    let sink = ElasticsearchSink::new(config.require_index()?)?;
    let created = sink.create_index(&index_definition()).await?;
    if created {
        info!(index = sink.index_name(), "Index created");
    } else {
        info!(index = sink.index_name(), "Index already exists");
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory_sync_core::models::MergedRecord;

    #[test]
    fn test_mapping_covers_every_document_field() {
        let doc: MergedRecord = serde_json::from_value(json!({
            "computer_name": "PC01",
            "exists_in_ocs": true,
            "exists_in_ad": true,
            "ocs_status": "enabled",
            "ad_status": "disabled",
            "ocs_last_inventory": "2024-01-01 00:00:00",
            "ocs_last_come": "2024-01-02 00:00:00",
            "ad_last_logon_time": "2024-01-10T00:00:00Z",
            "ad_last_modified_time": "2024-01-11T00:00:00Z",
            "ad_not_login_more_than_30d": true,
            "ad_not_login_more_than_45d": true,
            "ocs_last_inventory_more_than_30d": true,
            "ocs_last_come_more_than_30d": true,
            "ocs_last_come_more_than_45d": false,
            "ocs_inactive_duration_days": 59,
            "ad_inactive_duration_days": 51,
            "@timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        let serialized = serde_json::to_value(&doc).unwrap();
        let definition = index_definition();
        let properties = definition["mappings"]["properties"].as_object().unwrap();
        for field in serialized.as_object().unwrap().keys() {
            assert!(properties.contains_key(field), "unmapped field {}", field);
        }
        assert_eq!(properties.len(), serialized.as_object().unwrap().len());
    }
}
