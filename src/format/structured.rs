// The structured formatter family: one renderer per service shape

use std::fmt::Write as _;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use super::FormatKind;
use crate::level::Level;
use crate::record::Record;

/// Options shared by every structured encoding.
#[derive(Debug, Clone)]
pub struct StructuredOptions {
    pub application: String,
    pub environment: String,
    /// Host field; falls back to the application name where a shape
    /// requires a host.
    pub host: Option<String>,
    pub include_source_location: bool,
    pub pretty: bool,
}

impl Default for StructuredOptions {
    fn default() -> Self {
        Self {
            application: "relaylog".to_string(),
            environment: "production".to_string(),
            host: None,
            include_source_location: true,
            pretty: false,
        }
    }
}

/// Renders records in the service-specific shapes of the closed structured
/// family (everything except `Pattern`).
#[derive(Debug, Clone, Default)]
pub struct StructuredFormatter {
    options: StructuredOptions,
}

impl StructuredFormatter {
    pub fn new(options: StructuredOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &StructuredOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut StructuredOptions {
        &mut self.options
    }

    pub fn format(&self, record: &Record, kind: FormatKind) -> String {
        if kind == FormatKind::Xml {
            return self.render_xml(record);
        }

        let value = match kind {
            FormatKind::CloudWatch => self.render_cloudwatch(record),
            FormatKind::Elasticsearch => self.render_elasticsearch(record),
            FormatKind::Gelf => self.render_gelf(record),
            FormatKind::Logstash => self.render_logstash(record),
            FormatKind::OpenTelemetry => self.render_otel(record),
            FormatKind::Splunk => self.render_splunk(record),
            // Pattern is handled by the bundle; fall through to plain JSON.
            FormatKind::Json | FormatKind::Pattern | FormatKind::Xml => self.render_json(record),
        };

        let rendered = if self.options.pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        };
        rendered.unwrap_or_default()
    }

    fn host(&self) -> &str {
        self.options.host.as_deref().unwrap_or(&self.options.application)
    }

    fn rfc3339(record: &Record) -> String {
        let timestamp: DateTime<Utc> = record.timestamp().into();
        timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn epoch_secs_f64(record: &Record) -> f64 {
        record
            .timestamp()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn epoch_millis(record: &Record) -> u64 {
        record
            .timestamp()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn source_value(record: &Record) -> Value {
        let location = record.location();
        json!({
            "file": location.file,
            "line": location.line,
            "function": location.function,
        })
    }

    fn render_json(&self, record: &Record) -> Value {
        let mut value = json!({
            "timestamp": Self::rfc3339(record),
            "level": record.level().as_str(),
            "logger": record.logger_name(),
            "message": record.message(),
            "application": self.options.application,
            "environment": self.options.environment,
        });
        if let Some(host) = &self.options.host {
            value["host"] = Value::from(host.as_str());
        }
        if self.options.include_source_location && !record.location().file.is_empty() {
            value["source"] = Self::source_value(record);
        }
        if !record.data().is_empty() {
            value["data"] = record.data().to_json();
        }
        value
    }

    /// GELF 1.1; extra fields carry the `_` prefix the format requires
    fn render_gelf(&self, record: &Record) -> Value {
        let mut map = Map::new();
        map.insert("version".into(), "1.1".into());
        map.insert("host".into(), self.host().into());
        map.insert("short_message".into(), record.message().into());
        map.insert("timestamp".into(), Self::epoch_secs_f64(record).into());
        map.insert("level".into(), syslog_level(record.level()).into());
        map.insert("_logger".into(), record.logger_name().into());
        map.insert("_application".into(), self.options.application.as_str().into());
        for (key, value) in record.data().fields() {
            map.insert(format!("_{key}"), value.to_json());
        }
        Value::Object(map)
    }

    fn render_cloudwatch(&self, record: &Record) -> Value {
        let mut value = json!({
            "timestamp": Self::epoch_millis(record),
            "level": record.level().as_str(),
            "logger": record.logger_name(),
            "message": record.message(),
            "application": self.options.application,
        });
        if !record.data().is_empty() {
            value["fields"] = record.data().to_json();
        }
        value
    }

    fn render_elasticsearch(&self, record: &Record) -> Value {
        let mut value = json!({
            "@timestamp": Self::rfc3339(record),
            "log": {
                "level": record.level().as_str().to_lowercase(),
                "logger": record.logger_name(),
            },
            "message": record.message(),
            "service": {
                "name": self.options.application,
                "environment": self.options.environment,
            },
        });
        if !record.data().is_empty() {
            value["fields"] = record.data().to_json();
        }
        value
    }

    fn render_logstash(&self, record: &Record) -> Value {
        let mut value = json!({
            "@timestamp": Self::rfc3339(record),
            "@version": "1",
            "message": record.message(),
            "level": record.level().as_str(),
            "logger_name": record.logger_name(),
            "application": self.options.application,
        });
        if !record.data().is_empty() {
            value["fields"] = record.data().to_json();
        }
        value
    }

    fn render_otel(&self, record: &Record) -> Value {
        let nanos = record
            .timestamp()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let mut attributes = vec![
            json!({"key": "logger.name", "value": {"stringValue": record.logger_name()}}),
            json!({"key": "service.name", "value": {"stringValue": self.options.application}}),
        ];
        for (key, value) in record.data().fields() {
            attributes.push(json!({
                "key": key,
                "value": {"stringValue": value.to_json().to_string()},
            }));
        }

        json!({
            "timeUnixNano": nanos.to_string(),
            "severityNumber": otel_severity(record.level()),
            "severityText": record.level().as_str(),
            "body": {"stringValue": record.message()},
            "attributes": attributes,
        })
    }

    fn render_splunk(&self, record: &Record) -> Value {
        let mut event = json!({
            "message": record.message(),
            "level": record.level().as_str(),
            "logger": record.logger_name(),
        });
        if !record.data().is_empty() {
            event["fields"] = record.data().to_json();
        }
        json!({
            "time": Self::epoch_secs_f64(record),
            "host": self.host(),
            "source": self.options.application,
            "sourcetype": "_json",
            "event": event,
        })
    }

    fn render_xml(&self, record: &Record) -> String {
        let mut out = String::with_capacity(128 + record.message().len());
        let _ = write!(
            out,
            "<record timestamp=\"{}\" level=\"{}\" logger=\"{}\">",
            Self::rfc3339(record),
            record.level().as_str(),
            xml_escape(record.logger_name()),
        );
        let _ = write!(out, "<message>{}</message>", xml_escape(record.message()));
        if !record.data().is_empty() {
            out.push_str("<data>");
            for (key, value) in record.data().fields() {
                let _ = write!(
                    out,
                    "<field name=\"{}\">{}</field>",
                    xml_escape(key),
                    xml_escape(&value.to_json().to_string()),
                );
            }
            out.push_str("</data>");
        }
        out.push_str("</record>");
        out
    }
}

/// RFC 5424 severity scale (0 = emergency .. 7 = debug)
fn syslog_level(level: Level) -> u8 {
    match level {
        Level::Trace | Level::Debug => 7,
        Level::Info => 6,
        Level::Warn => 4,
        Level::Error => 3,
        Level::Fatal => 2,
        Level::Off => 6,
    }
}

/// OpenTelemetry severity numbers (TRACE=1.. FATAL=21 bands)
fn otel_severity(level: Level) -> u8 {
    match level {
        Level::Trace => 3,
        Level::Debug => 7,
        Level::Info => 11,
        Level::Warn => 15,
        Level::Error => 19,
        Level::Fatal => 23,
        Level::Off => 11,
    }
}

fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MessageStorage;

    fn record_with(msg: &str, level: Level) -> Record {
        let mut record = Record::new();
        record.storage = MessageStorage::new(msg);
        record.level = level;
        record.timestamp = std::time::SystemTime::now();
        record.data.add("iface", "eth0");
        record
    }

    fn parse(rendered: &str) -> Value {
        serde_json::from_str(rendered).unwrap()
    }

    #[test]
    fn test_json_shape() {
        let formatter = StructuredFormatter::default();
        let value = parse(&formatter.format(&record_with("m", Level::Info), FormatKind::Json));

        assert_eq!(value["message"], "m");
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["data"]["iface"], "eth0");
    }

    #[test]
    fn test_gelf_shape() {
        let formatter = StructuredFormatter::default();
        let value = parse(&formatter.format(&record_with("m", Level::Error), FormatKind::Gelf));

        assert_eq!(value["version"], "1.1");
        assert_eq!(value["short_message"], "m");
        assert_eq!(value["level"], 3);
        assert_eq!(value["_iface"], "eth0");
    }

    #[test]
    fn test_otel_severity_numbers() {
        let formatter = StructuredFormatter::default();
        let value = parse(&formatter.format(
            &record_with("m", Level::Fatal),
            FormatKind::OpenTelemetry,
        ));

        assert_eq!(value["severityNumber"], 23);
        assert_eq!(value["severityText"], "FATAL");
        assert_eq!(value["body"]["stringValue"], "m");
    }

    #[test]
    fn test_splunk_event_nesting() {
        let formatter = StructuredFormatter::default();
        let value = parse(&formatter.format(&record_with("m", Level::Warn), FormatKind::Splunk));

        assert_eq!(value["sourcetype"], "_json");
        assert_eq!(value["event"]["message"], "m");
        assert_eq!(value["event"]["fields"]["iface"], "eth0");
    }

    #[test]
    fn test_elasticsearch_lowercase_level() {
        let formatter = StructuredFormatter::default();
        let value = parse(&formatter.format(
            &record_with("m", Level::Warn),
            FormatKind::Elasticsearch,
        ));
        assert_eq!(value["log"]["level"], "warn");
        assert!(!value["@timestamp"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_logstash_version_field() {
        let formatter = StructuredFormatter::default();
        let value = parse(&formatter.format(&record_with("m", Level::Info), FormatKind::Logstash));
        assert_eq!(value["@version"], "1");
    }

    #[test]
    fn test_xml_escaping() {
        let formatter = StructuredFormatter::default();
        let rendered = formatter.format(&record_with("a < b & c", Level::Info), FormatKind::Xml);

        assert!(rendered.contains("<message>a &lt; b &amp; c</message>"));
        assert!(rendered.starts_with("<record "));
        assert!(rendered.ends_with("</record>"));
    }

    #[test]
    fn test_pretty_printing() {
        let mut formatter = StructuredFormatter::default();
        formatter.options_mut().pretty = true;
        let rendered = formatter.format(&record_with("m", Level::Info), FormatKind::Json);
        assert!(rendered.contains('\n'));
    }
}
