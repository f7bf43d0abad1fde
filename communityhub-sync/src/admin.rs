//! Form handling for the field mapping admin page.
//!
//! The host renders the page. This module supplies the rows to render and
//! turns a submitted form back into a [`FieldMapping`].

use crate::mapping::{FieldMapping, MappingEntry};
use crate::settings::{self, SettingsStore, FIELD_MAPPING_OPTION};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

/// Form field holding the array of mapping rows.
pub const MAPPING_FIELD_NAME: &str = "openid_connect_salesforce_field_mapping";

static TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*?>.*?</(script|style)>|<[^>]*>").expect("valid regex")
});
static LESS_THAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]*>?").expect("valid regex"));
static OCTETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%[a-fA-F0-9]{2}").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// One submitted form row. Either key may be absent from the submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRow {
    /// User meta key to write.
    #[serde(default, alias = "wordpress_key")]
    pub local_key: Option<String>,
    /// Salesforce Account field to read.
    #[serde(default, alias = "salesforce_key")]
    pub remote_key: Option<String>,
}

impl MappingRow {
    /// Creates a row with both keys present.
    pub fn new(local_key: impl Into<String>, remote_key: impl Into<String>) -> Self {
        Self {
            local_key: Some(local_key.into()),
            remote_key: Some(remote_key.into()),
        }
    }
}

/// A text input to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormInput {
    /// Element id.
    pub id: String,
    /// Form field name, e.g. `option[field][0][local_key]`.
    pub name: String,
    /// Current value.
    pub value: String,
}

/// One rendered mapping row: a local key input and a remote key input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingField {
    /// Zero-based row index used in the field names.
    pub index: usize,
    /// Local key input.
    pub local_key: FormInput,
    /// Remote key input.
    pub remote_key: FormInput,
}

/// Admin editor for a stored field mapping.
#[derive(Debug, Clone)]
pub struct MappingEditor {
    option_name: String,
}

impl Default for MappingEditor {
    fn default() -> Self {
        Self::new(FIELD_MAPPING_OPTION)
    }
}

impl MappingEditor {
    /// Creates an editor for the mapping stored under `option_name`.
    pub fn new(option_name: impl Into<String>) -> Self {
        Self {
            option_name: option_name.into(),
        }
    }

    /// Option name the mapping is stored under.
    pub fn option_name(&self) -> &str {
        &self.option_name
    }

    /// Returns the rows to render: one per entry, plus a blank trailing row.
    pub fn fields(&self, mapping: &FieldMapping) -> Vec<MappingField> {
        let mut fields: Vec<MappingField> = mapping
            .iter()
            .enumerate()
            .map(|(index, (local_key, entry))| self.field(index, local_key, &entry.remote))
            .collect();
        fields.push(self.field(mapping.len(), "", ""));
        fields
    }

    fn field(&self, index: usize, local_key: &str, remote_key: &str) -> MappingField {
        let input = |key: &str, value: &str| {
            let name = format!(
                "{}[{}][{}][{}]",
                self.option_name, MAPPING_FIELD_NAME, index, key
            );
            FormInput {
                id: name.clone(),
                name,
                value: value.to_string(),
            }
        };
        MappingField {
            index,
            local_key: input("local_key", local_key),
            remote_key: input("remote_key", remote_key),
        }
    }

    /// Converts a submitted settings form into a mapping.
    ///
    /// `input` is the option's form payload. Rows sit under
    /// [`MAPPING_FIELD_NAME`], either as an array or as an object keyed by
    /// row index. Object rows are taken in numeric index order, so a repeated
    /// local key keeps the row submitted last. Anything else yields an empty
    /// mapping.
    pub fn format_settings(&self, input: &Value) -> FieldMapping {
        let rows: Vec<MappingRow> = match input.get(MAPPING_FIELD_NAME) {
            Some(Value::Array(rows)) => rows.iter().filter_map(parse_row).collect(),
            Some(Value::Object(rows)) => {
                let mut indexed: Vec<(Option<u64>, &Value)> = rows
                    .iter()
                    .map(|(key, row)| (key.parse().ok(), row))
                    .collect();
                // Numeric keys in form order, then anything else.
                indexed.sort_by_key(|(index, _)| (index.is_none(), *index));
                indexed.into_iter().filter_map(|(_, row)| parse_row(row)).collect()
            }
            _ => Vec::new(),
        };
        format_rows(rows)
    }

    /// Formats a submitted form and persists the result.
    pub fn save(
        &self,
        store: &dyn SettingsStore,
        input: &Value,
    ) -> Result<FieldMapping, settings::Error> {
        let mapping = self.format_settings(input);
        mapping.save(store, &self.option_name)?;
        tracing::info!(
            option = %self.option_name,
            entries = mapping.len(),
            "field mapping saved"
        );
        Ok(mapping)
    }
}

fn parse_row(value: &Value) -> Option<MappingRow> {
    MappingRow::deserialize(value).ok()
}

/// Builds a mapping from form rows.
///
/// Both keys are sanitized as plain text. A row whose local or remote key is
/// missing or empty after sanitizing is dropped. A repeated local key
/// replaces the earlier entry.
pub fn format_rows(rows: impl IntoIterator<Item = MappingRow>) -> FieldMapping {
    let mut mapping = FieldMapping::new();
    for row in rows {
        let local_key = row.local_key.as_deref().map(sanitize_text_field);
        let remote_key = row.remote_key.as_deref().map(sanitize_text_field);
        match (local_key, remote_key) {
            (Some(local), Some(remote)) if !local.is_empty() && !remote.is_empty() => {
                mapping.set(local, MappingEntry::new(remote));
            }
            _ => tracing::debug!(?row, "dropping incomplete mapping row"),
        }
    }
    mapping
}

/// Sanitizes a single-line plain-text form value.
///
/// A `<` that does not open a complete tag is HTML-escaped and kept. HTML
/// tags (including script and style bodies) and percent-encoded octets are
/// removed. Whitespace runs then collapse to one space and the result is
/// trimmed.
pub fn sanitize_text_field(value: &str) -> String {
    let escaped = LESS_THAN.replace_all(value, |caps: &Captures| {
        let matched = &caps[0];
        if matched.ends_with('>') {
            matched.to_string()
        } else {
            escape_html(matched)
        }
    });
    let stripped = TAGS.replace_all(&escaped, "");
    let stripped = OCTETS.replace_all(&stripped, "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
