// SPDX-License-Identifier: Apache-2.0 OR MIT
// Formatter bundle: pattern layout plus the structured formatter family

mod pattern;
mod structured;

pub use pattern::{CustomFormatter, PatternFormatter, DEFAULT_PATTERN, DETAILED_PATTERN};
pub use structured::{StructuredFormatter, StructuredOptions};

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Output encodings the engine can render. The structured family is a
/// closed set sharing one options block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FormatKind {
    #[default]
    Pattern,
    CloudWatch,
    Elasticsearch,
    Gelf,
    Json,
    Logstash,
    OpenTelemetry,
    Splunk,
    Xml,
}

/// A logger's formatter configuration.
///
/// `format` is pure: same record in, same bytes out, no side effects.
#[derive(Debug, Clone, Default)]
pub struct Format {
    kind: FormatKind,
    pattern: PatternFormatter,
    structured: StructuredFormatter,
}

impl Format {
    pub fn new(kind: FormatKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: FormatKind) {
        self.kind = kind;
    }

    pub fn pattern(&self) -> &PatternFormatter {
        &self.pattern
    }

    pub fn pattern_mut(&mut self) -> &mut PatternFormatter {
        &mut self.pattern
    }

    pub fn structured(&self) -> &StructuredFormatter {
        &self.structured
    }

    pub fn structured_mut(&mut self) -> &mut StructuredFormatter {
        &mut self.structured
    }

    /// Render `record` with the active encoding
    pub fn format(&self, record: &Record) -> String {
        match self.kind {
            FormatKind::Pattern => self.pattern.format(record),
            kind => self.structured.format(record, kind),
        }
    }
}
