//! Field formatters that hide configured field values.
//!
//! Both the text and JSON formatters share one visitor that turns recorded
//! fields into [`FieldValue`]s; only the final rendering differs.

use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use tracing::field::{Field, Visit};
use tracing_subscriber::field::RecordFields;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::FormatFields;

#[derive(Clone, Debug, PartialEq)]
enum FieldValue {
    Redacted,
    Text(String),
    Quoted(String),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    fn render_text(&self, replacement: &str) -> String {
        match self {
            FieldValue::Redacted => format!("{replacement:?}"),
            FieldValue::Text(text) => text.clone(),
            FieldValue::Quoted(text) => format!("{text:?}"),
            FieldValue::Signed(v) => v.to_string(),
            FieldValue::Unsigned(v) => v.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Bool(v) => v.to_string(),
        }
    }

    fn into_json(self, replacement: &str) -> JsonValue {
        match self {
            FieldValue::Redacted => JsonValue::String(replacement.to_string()),
            FieldValue::Text(text) | FieldValue::Quoted(text) => JsonValue::String(text),
            FieldValue::Signed(v) => JsonValue::Number(v.into()),
            FieldValue::Unsigned(v) => JsonValue::Number(v.into()),
            FieldValue::Float(v) => JsonNumber::from_f64(v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string())),
            FieldValue::Bool(v) => JsonValue::Bool(v),
        }
    }
}

struct FieldCollector<'a> {
    redacted: &'a HashSet<String>,
    entries: Vec<(&'static str, FieldValue)>,
}

impl<'a> FieldCollector<'a> {
    fn new(redacted: &'a HashSet<String>) -> Self {
        Self {
            redacted,
            entries: Vec::new(),
        }
    }

    fn push(&mut self, field: &Field, value: FieldValue) {
        let value = if self.redacted.contains(field.name()) {
            FieldValue::Redacted
        } else {
            value
        };
        self.entries.push((field.name(), value));
    }
}

impl Visit for FieldCollector<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, FieldValue::Text(format!("{value:?}")));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, FieldValue::Signed(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, FieldValue::Unsigned(value));
    }

    fn record_i128(&mut self, field: &Field, value: i128) {
        self.push(field, FieldValue::Text(value.to_string()));
    }

    fn record_u128(&mut self, field: &Field, value: u128) {
        self.push(field, FieldValue::Text(value.to_string()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, FieldValue::Float(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, FieldValue::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, FieldValue::Quoted(value.to_string()));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        self.push(field, FieldValue::Text(value.to_string()));
    }
}

fn render_text(entries: Vec<(&'static str, FieldValue)>, replacement: &str, out: &mut impl fmt::Write) -> fmt::Result {
    for (index, (key, value)) in entries.into_iter().enumerate() {
        if index > 0 {
            out.write_char(' ')?;
        }
        write!(out, "{key}={}", value.render_text(replacement))?;
    }
    Ok(())
}

fn render_json(entries: Vec<(&'static str, FieldValue)>, replacement: &str) -> Result<String, fmt::Error> {
    let object: JsonMap<String, JsonValue> = entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.into_json(replacement)))
        .collect();
    serde_json::to_string(&JsonValue::Object(object)).map_err(|_| fmt::Error)
}

/// `key=value` formatter for the compact and pretty outputs.
#[derive(Clone)]
pub(crate) struct TextRedactingFields {
    redacted: Arc<HashSet<String>>,
    replacement: Arc<String>,
}

impl TextRedactingFields {
    pub(crate) fn new(redacted: Arc<HashSet<String>>, replacement: Arc<String>) -> Self {
        Self { redacted, replacement }
    }
}

impl<'writer> FormatFields<'writer> for TextRedactingFields {
    fn format_fields<R: RecordFields>(&self, mut writer: Writer<'writer>, fields: R) -> fmt::Result {
        let mut collector = FieldCollector::new(&self.redacted);
        fields.record(&mut collector);
        render_text(collector.entries, &self.replacement, &mut writer)
    }
}

/// JSON object formatter for the JSON output.
#[derive(Clone)]
pub(crate) struct JsonRedactingFields {
    redacted: Arc<HashSet<String>>,
    replacement: Arc<String>,
}

impl JsonRedactingFields {
    pub(crate) fn new(redacted: Arc<HashSet<String>>, replacement: Arc<String>) -> Self {
        Self { redacted, replacement }
    }
}

impl<'writer> FormatFields<'writer> for JsonRedactingFields {
    fn format_fields<R: RecordFields>(&self, mut writer: Writer<'writer>, fields: R) -> fmt::Result {
        let mut collector = FieldCollector::new(&self.redacted);
        fields.record(&mut collector);
        writer.write_str(&render_json(collector.entries, &self.replacement)?)
    }
}
