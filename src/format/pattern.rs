// Brace-token pattern formatter

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::record::Record;

pub const DEFAULT_PATTERN: &str = "[{timestamp}] [{level}] [{name}] - {message}";
pub const DETAILED_PATTERN: &str =
    "[{timestamp}] [{level}] [{name}] [{source}:{line}] - {message}";
const DEFAULT_TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// User-registered renderer for a custom token.
pub type CustomFormatter = Arc<dyn Fn(&Record) -> String + Send + Sync>;

/// One parsed piece of the pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fragment {
    Literal(String),
    Timestamp,
    Level,
    Name,
    Message,
    Source,
    Function,
    Line,
    Data,
    /// Unrecognized braced token, resolved against the custom registry at
    /// render time.
    Custom(String),
}

/// Token-based line layout.
///
/// Patterns mix literal text with `{timestamp}`, `{level}`, `{name}`,
/// `{message}`, `{source}`, `{function}`, `{line}` and `{data}` tokens.
/// Further tokens can be registered with [`register_custom`]; a braced
/// token with no registered renderer falls back to its literal text. The
/// pattern is parsed once into fragments when set.
///
/// [`register_custom`]: PatternFormatter::register_custom
#[derive(Clone)]
pub struct PatternFormatter {
    pattern: String,
    time_format: String,
    fragments: Vec<Fragment>,
    custom: HashMap<String, CustomFormatter>,
}

impl PatternFormatter {
    pub fn new(pattern: &str) -> Self {
        let mut formatter = Self {
            pattern: pattern.to_string(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            fragments: Vec::new(),
            custom: HashMap::new(),
        };
        formatter.parse();
        formatter
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn set_pattern(&mut self, pattern: &str) {
        self.pattern = pattern.to_string();
        self.parse();
    }

    /// chrono strftime format used for `{timestamp}`
    pub fn set_time_format(&mut self, time_format: &str) {
        self.time_format = time_format.to_string();
    }

    /// Register a renderer for a custom token (braces included, e.g.
    /// `"{thread}"`). Built-in tokens cannot be overridden.
    pub fn register_custom(
        &mut self,
        token: &str,
        formatter: impl Fn(&Record) -> String + Send + Sync + 'static,
    ) {
        self.custom.insert(token.to_string(), Arc::new(formatter));
    }

    fn parse(&mut self) {
        self.fragments.clear();
        let mut literal = String::new();
        let mut rest = self.pattern.as_str();

        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|i| open + i) else {
                break;
            };
            let token = &rest[open..=close];
            let fragment = match token {
                "{timestamp}" => Fragment::Timestamp,
                "{level}" => Fragment::Level,
                "{name}" => Fragment::Name,
                "{message}" => Fragment::Message,
                "{source}" => Fragment::Source,
                "{function}" => Fragment::Function,
                "{line}" => Fragment::Line,
                "{data}" => Fragment::Data,
                _ => Fragment::Custom(token.to_string()),
            };

            literal.push_str(&rest[..open]);
            if !literal.is_empty() {
                self.fragments.push(Fragment::Literal(std::mem::take(&mut literal)));
            }
            self.fragments.push(fragment);
            rest = &rest[close + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            self.fragments.push(Fragment::Literal(literal));
        }
    }

    pub fn format(&self, record: &Record) -> String {
        let mut out =
            String::with_capacity(self.pattern.len() + record.message().len() + 16);

        for fragment in &self.fragments {
            match fragment {
                Fragment::Literal(text) => out.push_str(text),
                Fragment::Timestamp => {
                    let timestamp: DateTime<Local> = record.timestamp().into();
                    let _ = write!(out, "{}", timestamp.format(&self.time_format));
                }
                Fragment::Level => out.push_str(record.level().as_str()),
                Fragment::Name => out.push_str(record.logger_name()),
                Fragment::Message => out.push_str(record.message()),
                Fragment::Source => out.push_str(record.location().file),
                Fragment::Function => out.push_str(record.location().function),
                Fragment::Line => {
                    let _ = write!(out, "{}", record.location().line);
                }
                Fragment::Data => {
                    if !record.data().is_empty() {
                        let _ = write!(out, "{}", record.data().to_json());
                    }
                }
                Fragment::Custom(token) => match self.custom.get(token) {
                    Some(formatter) => out.push_str(&formatter(record)),
                    None => out.push_str(token),
                },
            }
        }
        out
    }
}

impl Default for PatternFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN)
    }
}

impl std::fmt::Debug for PatternFormatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternFormatter")
            .field("pattern", &self.pattern)
            .field("time_format", &self.time_format)
            .field("custom_tokens", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use crate::record::SourceLocation;
    use crate::storage::MessageStorage;

    fn record_with(msg: &str, level: Level) -> Record {
        let mut record = Record::new();
        record.storage = MessageStorage::new(msg);
        record.level = level;
        record.location = SourceLocation::new("relay.rs", 42, "relay::ingest");
        record.timestamp = std::time::SystemTime::now();
        record
    }

    #[test]
    fn test_default_pattern() {
        let formatter = PatternFormatter::default();
        let line = formatter.format(&record_with("hello", Level::Info));

        assert!(line.contains("[INFO]"));
        assert!(line.ends_with("- hello"));
    }

    #[test]
    fn test_detailed_pattern_tokens() {
        let formatter = PatternFormatter::new(DETAILED_PATTERN);
        let line = formatter.format(&record_with("boom", Level::Error));

        assert!(line.contains("[relay.rs:42]"));
        assert!(line.contains("[ERROR]"));
    }

    #[test]
    fn test_unknown_token_stays_literal() {
        let formatter = PatternFormatter::new("{nope} {message}");
        let line = formatter.format(&record_with("kept", Level::Info));
        assert_eq!(line, "{nope} kept");
    }

    #[test]
    fn test_unterminated_brace() {
        let formatter = PatternFormatter::new("{message} trailing {");
        let line = formatter.format(&record_with("m", Level::Info));
        assert_eq!(line, "m trailing {");
    }

    #[test]
    fn test_function_token() {
        let formatter = PatternFormatter::new("{function}:{line}");
        let line = formatter.format(&record_with("x", Level::Debug));
        assert_eq!(line, "relay::ingest:42");
    }

    #[test]
    fn test_data_token() {
        let formatter = PatternFormatter::new("{message} {data}");
        let mut record = record_with("msg", Level::Info);
        record.data.add("k", 7i64);

        let line = formatter.format(&record);
        assert!(line.starts_with("msg {"));
        assert!(line.contains("\"k\":7"));
    }

    #[test]
    fn test_custom_token_renderer() {
        let mut formatter = PatternFormatter::new("[{thread}] {message}");
        formatter.register_custom("{thread}", |record: &Record| {
            format!("thread-for-{}", record.level().as_str())
        });

        let line = formatter.format(&record_with("payload", Level::Info));
        assert_eq!(line, "[thread-for-INFO] payload");
    }

    #[test]
    fn test_custom_registration_survives_reparse() {
        let mut formatter = PatternFormatter::new("{message}");
        formatter.register_custom("{tag}", |_| "tagged".to_string());

        formatter.set_pattern("{tag} {message}");
        let line = formatter.format(&record_with("m", Level::Info));
        assert_eq!(line, "tagged m");
    }

    #[test]
    fn test_set_pattern_reparses() {
        let mut formatter = PatternFormatter::default();
        formatter.set_pattern("{level}");
        assert_eq!(formatter.format(&record_with("x", Level::Warn)), "WARN");
    }
}
