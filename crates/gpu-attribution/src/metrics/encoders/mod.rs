use std::collections::HashMap;

use serde::Deserialize;

use super::ATTRIBUTION_MEASUREMENT;
use crate::attribution::DeviceAttribution;
use crate::NO_OWNER;

pub mod influx;
pub mod json;

/// Represents a field value that can be encoded in metrics
#[derive(Debug, Clone, serde::Serialize)]
pub enum FieldValue {
    Integer(i64),
    Boolean(bool),
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

/// Output format of emitted records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MetricsFormat {
    #[default]
    Json,
    Influx,
}

/// Trait for encoding metrics data into different formats
pub trait MetricsEncoder: Send + Sync {
    /// Encode metrics with measurement name, tags, fields, and timestamp
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String;

    /// Encode one device attribution
    ///
    /// The device index and every metadata entry become tags; `pid` is `-1`
    /// for an idle device.
    fn encode_device_attribution(&self, attribution: &DeviceAttribution, timestamp: i64) -> String {
        let mut tags = attribution.metadata.clone();
        tags.insert("device".to_string(), attribution.device_index.to_string());

        let mut fields = HashMap::new();
        fields.insert(
            "pid".to_string(),
            i64::from(attribution.pid.unwrap_or(NO_OWNER)).into(),
        );
        fields.insert("owned".to_string(), attribution.pid.is_some().into());

        self.encode_metrics(ATTRIBUTION_MEASUREMENT, &tags, &fields, timestamp)
    }
}

/// Creates the encoder for `format`.
pub fn create_encoder(format: MetricsFormat) -> Box<dyn MetricsEncoder + Send + Sync> {
    match format {
        MetricsFormat::Json => Box::new(json::JsonEncoder::new()),
        MetricsFormat::Influx => Box::new(influx::InfluxEncoder::new()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn owned_attribution() -> DeviceAttribution {
        DeviceAttribution {
            device_index: 0,
            pid: Some(1234),
            metadata: HashMap::from([("job".to_string(), "train_a".to_string())]),
        }
    }

    #[test]
    fn test_field_value_from_i64() {
        let value: FieldValue = 42i64.into();
        match value {
            FieldValue::Integer(i) => assert_eq!(i, 42),
            _ => panic!("Expected Integer variant"),
        }
    }

    #[test]
    fn test_field_value_from_bool() {
        let value: FieldValue = true.into();
        match value {
            FieldValue::Boolean(b) => assert!(b),
            _ => panic!("Expected Boolean variant"),
        }
    }

    #[test]
    fn test_create_encoder_json() {
        let encoder = create_encoder(MetricsFormat::Json);
        let result = encoder.encode_device_attribution(&owned_attribution(), 1234567890);
        assert!(result.contains(ATTRIBUTION_MEASUREMENT));
        assert!(result.starts_with('{'));
    }

    #[test]
    fn test_create_encoder_influx() {
        let encoder = create_encoder(MetricsFormat::Influx);
        let result = encoder.encode_device_attribution(&owned_attribution(), 1234567890);
        assert!(result.starts_with(ATTRIBUTION_MEASUREMENT));
    }

    #[test]
    fn test_metrics_format_deserializes_lowercase() {
        let format: MetricsFormat = serde_yaml::from_str("influx").expect("parse");
        assert_eq!(format, MetricsFormat::Influx);
    }
}
