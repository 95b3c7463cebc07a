use std::collections::HashMap;

use influxdb_line_protocol::LineProtocolBuilder;

use super::FieldValue;
use super::MetricsEncoder;
use crate::metrics::BytesWrapper;

/// InfluxDB line protocol encoder
pub struct InfluxEncoder;

impl InfluxEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsEncoder for InfluxEncoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String {
        let mut builder = LineProtocolBuilder::new().measurement(measurement);

        // line protocol has no representation for empty tag keys or values
        let mut tag_entries: Vec<_> = tags
            .iter()
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();
        tag_entries.sort_by_key(|(k, _)| *k);
        for (key, value) in tag_entries {
            builder = builder.tag(key, value);
        }

        // the first field moves the builder into its after-field state
        let mut field_entries: Vec<_> = fields.iter().collect();
        field_entries.sort_by_key(|(k, _)| *k);

        if let Some((first_key, first_value)) = field_entries.first() {
            let mut after_first_field = match first_value {
                FieldValue::Integer(i) => builder.field(first_key, *i),
                FieldValue::Boolean(b) => builder.field(first_key, *b),
            };

            for (key, value) in field_entries.iter().skip(1) {
                after_first_field = match value {
                    FieldValue::Integer(i) => after_first_field.field(key, *i),
                    FieldValue::Boolean(b) => after_first_field.field(key, *b),
                };
            }

            let lp_built = after_first_field.timestamp(timestamp).close_line().build();
            BytesWrapper::from(lp_built).to_string()
        } else {
            let lp_built = builder
                .field("_empty", true)
                .timestamp(timestamp)
                .close_line()
                .build();
            BytesWrapper::from(lp_built).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::attribution::DeviceAttribution;

    #[test]
    fn test_encode_owned_device() {
        let encoder = InfluxEncoder::new();
        let attribution = DeviceAttribution {
            device_index: 0,
            pid: Some(1234),
            metadata: HashMap::from([("job".to_string(), "train_a".to_string())]),
        };

        let result = encoder.encode_device_attribution(&attribution, 1609459200000000000);

        assert_eq!(
            result,
            "gpu_process_attribution,device=0,job=train_a owned=true,pid=1234i 1609459200000000000\n"
        );
    }

    #[test]
    fn test_encode_idle_device() {
        let encoder = InfluxEncoder::new();
        let attribution = DeviceAttribution {
            device_index: 3,
            pid: None,
            metadata: HashMap::new(),
        };

        let result = encoder.encode_device_attribution(&attribution, 1609459200000000000);

        assert_eq!(
            result,
            "gpu_process_attribution,device=3 owned=false,pid=-1i 1609459200000000000\n"
        );
    }

    #[test]
    fn test_empty_tag_values_are_dropped() {
        let encoder = InfluxEncoder::new();
        let mut tags = HashMap::new();
        tags.insert("rank".to_string(), String::new());
        tags.insert("job".to_string(), "a".to_string());
        let mut fields = HashMap::new();
        fields.insert("pid".to_string(), 1i64.into());

        let result = encoder.encode_metrics("m", &tags, &fields, 1);

        assert!(result.starts_with("m,job=a "));
        assert!(!result.contains("rank"));
    }

    #[test]
    fn test_tag_values_with_spaces_are_escaped() {
        let encoder = InfluxEncoder::new();
        let mut tags = HashMap::new();
        tags.insert("job".to_string(), "train a".to_string());
        let mut fields = HashMap::new();
        fields.insert("pid".to_string(), 1i64.into());

        let result = encoder.encode_metrics("m", &tags, &fields, 1);

        assert!(result.contains("job=train\\ a"));
    }

    #[test]
    fn test_encode_metrics_empty_fields() {
        let encoder = InfluxEncoder::new();
        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "test".to_string());
        let fields = HashMap::new();

        let result = encoder.encode_metrics("empty_fields", &tags, &fields, 1234567890000000000);

        assert!(result.starts_with("empty_fields"));
        assert!(result.contains("service=test"));
        assert!(result.contains("_empty=true"));
        assert!(result.contains("1234567890000000000"));
    }

    #[test]
    fn test_field_ordering_consistency() {
        let encoder = InfluxEncoder::new();
        let tags = HashMap::new();
        let mut fields = HashMap::new();
        fields.insert("z_field".to_string(), 1i64.into());
        fields.insert("a_field".to_string(), 2i64.into());
        fields.insert("m_field".to_string(), false.into());

        let result1 = encoder.encode_metrics("test_ordering", &tags, &fields, 1234567890000000000);
        let result2 = encoder.encode_metrics("test_ordering", &tags, &fields, 1234567890000000000);

        assert_eq!(result1, result2);

        let a_pos = result1.find("a_field").unwrap();
        let m_pos = result1.find("m_field").unwrap();
        let z_pos = result1.find("z_field").unwrap();

        assert!(a_pos < m_pos);
        assert!(m_pos < z_pos);
    }
}
