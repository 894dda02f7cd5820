use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw per-chat configuration: a flat key-value mapping as stored by the
/// configuration layer. Typed views are built on top of it
/// (see [`crate::SamplingParams::from_config`], [`crate::ContextParams::from_config`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatConfig {
    entries: Map<String, Value>,
}

impl ChatConfig {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly handy in tests and fixtures.
    pub fn with<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.entries.insert(key.to_string(), value.into());
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// String value for `key`. Non-string values yield `None`.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// Like [`ChatConfig::str`] but treats an empty (or whitespace-only) string as absent.
    pub fn non_empty_str(&self, key: &str) -> Option<&str> {
        self.str(key).filter(|s| !s.trim().is_empty())
    }

    /// Numeric value for `key`. Accepts JSON numbers and numeric strings.
    pub fn f64(&self, key: &str) -> Option<f64> {
        match self.entries.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn f32(&self, key: &str) -> Option<f32> {
        self.f64(key).map(|v| v as f32)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean value for `key`. Accepts JSON booleans and `"true"`/`"false"`.
    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl From<Map<String, Value>> for ChatConfig {
    fn from(entries: Map<String, Value>) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_getters_accept_strings() {
        let cfg = ChatConfig::new()
            .with("temp", "0.7")
            .with("top_k", 40)
            .with("context", "2048");
        assert_eq!(cfg.f32("temp"), Some(0.7));
        assert_eq!(cfg.i64("top_k"), Some(40));
        assert_eq!(cfg.i64("context"), Some(2048));
        assert_eq!(cfg.f64("missing"), None);
    }

    #[test]
    fn blank_strings_are_not_values() {
        let cfg = ChatConfig::new().with("model", "  ");
        assert!(cfg.contains("model"));
        assert_eq!(cfg.non_empty_str("model"), None);
    }

    #[test]
    fn deserializes_from_flat_object() {
        let cfg: ChatConfig =
            serde_json::from_str(r#"{"model":"llama-7b.gguf","use_metal":true}"#).unwrap();
        assert_eq!(cfg.str("model"), Some("llama-7b.gguf"));
        assert_eq!(cfg.bool("use_metal"), Some(true));
    }
}
