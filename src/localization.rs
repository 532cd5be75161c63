//! Localized responses
//!
//! A translation table maps `key -> language -> payload`. Message payloads are
//! Messages API content whose string leaves may carry `{name}` placeholders;
//! constants are plain strings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalizationError {
    #[error("No translation entry for key '{0}'")]
    MissingKey(String),
    #[error("Translation entry '{key}' has no '{language}' variant")]
    MissingLanguage { key: String, language: String },
    #[error("No value for placeholder '{{{0}}}'")]
    MissingPlaceholder(String),
    #[error("Malformed template: {0}")]
    MalformedTemplate(String),
}

/// Source of localized responses and constants
pub trait TranslationTable: Send + Sync {
    /// Payload for `key` in `language` with placeholders filled from `substitutions`
    fn get_localized_message(
        &self,
        key: &str,
        language: &str,
        substitutions: &Map<String, Value>,
    ) -> Result<Value, LocalizationError>;

    fn get_localized_constant(&self, key: &str, language: &str)
        -> Result<String, LocalizationError>;
}

// ============================================================================
// Placeholder formatting
// ============================================================================

/// Format every string leaf of `data`, descending into arrays and objects.
/// Non-string leaves are returned as they are.
pub fn format_nested(
    data: &Value,
    values: &Map<String, Value>,
) -> Result<Value, LocalizationError> {
    Ok(match data {
        Value::String(s) => Value::String(format_placeholders(s, values)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| format_nested(item, values))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), format_nested(v, values)?)))
                .collect::<Result<_, LocalizationError>>()?,
        ),
        other => other.clone(),
    })
}

/// Replace `{name}` placeholders in `template`. `{{` and `}}` produce literal
/// braces. String values are inserted as-is, anything else in its JSON form.
pub fn format_placeholders(
    template: &str,
    values: &Map<String, Value>,
) -> Result<String, LocalizationError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => {
                            return Err(LocalizationError::MalformedTemplate(format!(
                                "unclosed placeholder in '{template}'"
                            )))
                        }
                        Some(c) => name.push(c),
                    }
                }
                match values.get(&name) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => return Err(LocalizationError::MissingPlaceholder(name)),
                }
            }
            '}' => {
                return Err(LocalizationError::MalformedTemplate(format!(
                    "single '}}' in '{template}'"
                )))
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

// ============================================================================
// Static table
// ============================================================================

/// Translation table held in memory, usually deserialized from JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticTranslationTable {
    #[serde(default)]
    pub messages: HashMap<String, HashMap<String, Value>>,
    #[serde(default)]
    pub constants: HashMap<String, HashMap<String, String>>,
}

impl StaticTranslationTable {
    pub fn new(
        messages: HashMap<String, HashMap<String, Value>>,
        constants: HashMap<String, HashMap<String, String>>,
    ) -> Self {
        Self {
            messages,
            constants,
        }
    }

    pub fn from_json(data: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(data)
    }

    /// Check if `value` is the constant `key` in any language
    pub fn constant_matches(&self, key: &str, value: &str) -> bool {
        is_value_in_table(key, value, &self.constants)
    }
}

fn lookup<'a, T>(
    table: &'a HashMap<String, HashMap<String, T>>,
    key: &str,
    language: &str,
) -> Result<&'a T, LocalizationError> {
    table
        .get(key)
        .ok_or_else(|| LocalizationError::MissingKey(key.to_string()))?
        .get(language)
        .ok_or_else(|| LocalizationError::MissingLanguage {
            key: key.to_string(),
            language: language.to_string(),
        })
}

impl TranslationTable for StaticTranslationTable {
    fn get_localized_message(
        &self,
        key: &str,
        language: &str,
        substitutions: &Map<String, Value>,
    ) -> Result<Value, LocalizationError> {
        format_nested(lookup(&self.messages, key, language)?, substitutions)
    }

    fn get_localized_constant(
        &self,
        key: &str,
        language: &str,
    ) -> Result<String, LocalizationError> {
        lookup(&self.constants, key, language).cloned()
    }
}

/// Check if any language of the entry `key` equals `value`.
/// Typically used to match button replies against localized labels.
pub fn is_value_in_table(
    key: &str,
    value: &str,
    table: &HashMap<String, HashMap<String, String>>,
) -> bool {
    table
        .get(key)
        .is_some_and(|languages| languages.values().any(|v| v == value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn foo(value: &str) -> Map<String, Value> {
        values(&[("foo", json!(value))])
    }

    #[test]
    fn test_empty_object() {
        assert_eq!(format_nested(&json!({}), &foo("Won't Appear")).unwrap(), json!({}));
    }

    #[test]
    fn test_unformatted_string() {
        let data = json!("No placeholders here");
        assert_eq!(format_nested(&data, &foo("Won't Appear")).unwrap(), data);
    }

    #[test]
    fn test_format_string() {
        assert_eq!(
            format_nested(&json!("Hello, {foo}!"), &foo("World")).unwrap(),
            json!("Hello, World!")
        );
    }

    #[test]
    fn test_format_mixed_nested_structures() {
        let data = json!({
            "greeting": "Hi {foo}",
            "items": ["{foo}1", {"deep": "{foo}2"}],
            "meta": 123
        });
        let expected = json!({
            "greeting": "Hi Sam",
            "items": ["Sam1", {"deep": "Sam2"}],
            "meta": 123
        });
        assert_eq!(format_nested(&data, &foo("Sam")).unwrap(), expected);
    }

    #[test]
    fn test_non_string_leaves_pass_through() {
        let data = json!({"int": 42, "float": 2.5, "bool": true, "none": null, "string": "{foo}"});
        let expected = json!({"int": 42, "float": 2.5, "bool": true, "none": null, "string": "Zed"});
        assert_eq!(format_nested(&data, &foo("Zed")).unwrap(), expected);
    }

    #[test]
    fn test_deeply_nested_with_unused_values() {
        let data = json!({"a": [{"b": ["{foo}", {"c": "{foo}"}]}]});
        let substitutions = values(&[("foo", json!("Deep")), ("bar", json!("Won't Appear"))]);
        assert_eq!(
            format_nested(&data, &substitutions).unwrap(),
            json!({"a": [{"b": ["Deep", {"c": "Deep"}]}]})
        );
    }

    #[test]
    fn test_escaped_braces_and_non_string_values() {
        let substitutions = values(&[("n", json!(3)), ("name", json!("Ana"))]);
        assert_eq!(
            format_placeholders("{{literal}} {name} has {n} items", &substitutions).unwrap(),
            "{literal} Ana has 3 items"
        );
    }

    #[test]
    fn test_missing_and_malformed_placeholders() {
        assert_eq!(
            format_placeholders("Hi {name}", &Map::new()),
            Err(LocalizationError::MissingPlaceholder("name".into()))
        );
        assert!(matches!(
            format_placeholders("Hi {name", &Map::new()),
            Err(LocalizationError::MalformedTemplate(_))
        ));
        assert!(matches!(
            format_placeholders("oops }", &Map::new()),
            Err(LocalizationError::MalformedTemplate(_))
        ));
    }

    #[test]
    fn test_multibyte_text_survives() {
        assert_eq!(
            format_placeholders("Zdravo {ime}, čestitamo 🎉", &values(&[("ime", json!("Željko"))]))
                .unwrap(),
            "Zdravo Željko, čestitamo 🎉"
        );
    }

    #[test]
    fn test_static_table_lookup() {
        let table = StaticTranslationTable::from_json(json!({
            "messages": {
                "welcome": {
                    "en": {"body": {"type": "TEXT", "text": "Welcome {name}"}},
                    "hr": {"body": {"type": "TEXT", "text": "Dobrodošli {name}"}}
                }
            },
            "constants": {"yes": {"en": "Yes", "hr": "Da"}}
        }))
        .unwrap();

        let message = table
            .get_localized_message("welcome", "hr", &values(&[("name", json!("Ana"))]))
            .unwrap();
        assert_eq!(message["body"]["text"], "Dobrodošli Ana");
        assert_eq!(table.get_localized_constant("yes", "hr").unwrap(), "Da");

        assert_eq!(
            table.get_localized_constant("yes", "de"),
            Err(LocalizationError::MissingLanguage {
                key: "yes".into(),
                language: "de".into()
            })
        );
        assert_eq!(
            table.get_localized_message("nope", "en", &Map::new()),
            Err(LocalizationError::MissingKey("nope".into()))
        );
    }

    #[test]
    fn test_is_value_in_table() {
        let table = StaticTranslationTable::from_json(json!({
            "constants": {"yes": {"en": "Yes", "hr": "Da"}}
        }))
        .unwrap();

        assert!(table.constant_matches("yes", "Da"));
        assert!(!table.constant_matches("yes", "Nein"));
        assert!(!is_value_in_table("missing", "Yes", &table.constants));
    }
}
