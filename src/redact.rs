//! Privacy/redaction engine.
//!
//! Applies an ordered list of pattern rules to strings and recursively
//! sanitizes structured payloads. In strict mode, no original text survives;
//! only a SHA-256 hash of the original does.

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::{PrivacyMode, RedactionRuleConfig};

/// A compiled redaction rule.
pub struct RedactionRule {
    pub name: String,
    pattern: Regex,
    replacement: Option<String>,
}

impl RedactionRule {
    pub fn compile(cfg: &RedactionRuleConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            name: cfg.name.clone(),
            pattern: Regex::new(&cfg.pattern)?,
            replacement: cfg.replacement.clone(),
        })
    }

    fn default_replacement(&self) -> String {
        format!("[REDACTED:{}]", self.name)
    }
}

/// Result of redacting a single string.
pub struct RedactedText {
    /// `None` in strict mode; `Some` (possibly unchanged) in standard mode.
    pub text: Option<String>,
    pub redacted: bool,
    pub hash: String,
}

pub struct Redactor {
    rules: Vec<RedactionRule>,
    mode: PrivacyMode,
}

impl Redactor {
    pub fn new(rules: Vec<RedactionRule>, mode: PrivacyMode) -> Self {
        Self { rules, mode }
    }

    pub fn from_config(
        rules: &[RedactionRuleConfig],
        mode: PrivacyMode,
    ) -> Result<Self, regex::Error> {
        let compiled = rules
            .iter()
            .map(RedactionRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(compiled, mode))
    }

    fn hash(s: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(s.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Apply every rule to one string, in order.
    pub fn redact_text(&self, s: &str) -> RedactedText {
        let hash = Self::hash(s);

        if self.mode == PrivacyMode::Strict {
            return RedactedText {
                text: None,
                redacted: true,
                hash,
            };
        }

        let mut working = s.to_string();
        let mut applied = false;
        for rule in &self.rules {
            if rule.pattern.is_match(&working) {
                applied = true;
                let replacement = rule
                    .replacement
                    .clone()
                    .unwrap_or_else(|| rule.default_replacement());
                working = rule
                    .pattern
                    .replace_all(&working, replacement.as_str())
                    .into_owned();
            }
        }

        RedactedText {
            text: Some(working),
            redacted: applied,
            hash,
        }
    }

    /// Structural recursion over JSON. Producer contract requires acyclic
    /// metadata (JSON values already cannot cycle by construction), but
    /// recursion depth is still bounded.
    pub fn redact_value(&self, v: &Value) -> Value {
        self.redact_value_depth(v, 0)
    }

    fn redact_value_depth(&self, v: &Value, depth: usize) -> Value {
        const MAX_DEPTH: usize = 64;
        if depth >= MAX_DEPTH {
            return Value::String("[REDACTED:max-depth]".to_string());
        }
        match v {
            Value::String(s) => {
                let r = self.redact_text(s);
                Value::String(r.text.unwrap_or_else(|| "[REDACTED]".to_string()))
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|i| self.redact_value_depth(i, depth + 1))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, val) in map {
                    out.insert(k.clone(), self.redact_value_depth(val, depth + 1));
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    pub fn mode(&self) -> PrivacyMode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedactionRuleConfig;

    fn make_redactor(mode: PrivacyMode) -> Redactor {
        let rules = vec![RedactionRuleConfig {
            name: "secret".into(),
            pattern: "secret".into(),
            replacement: None,
        }];
        Redactor::from_config(&rules, mode).unwrap()
    }

    #[test]
    fn strict_mode_never_retains_original() {
        let r = make_redactor(PrivacyMode::Strict);
        let result = r.redact_text("secret token ABCDEF");
        assert!(result.text.is_none());
        assert!(result.redacted);
        assert_eq!(result.hash, super::Redactor::hash("secret token ABCDEF"));
    }

    #[test]
    fn standard_mode_applies_matching_rule() {
        let r = make_redactor(PrivacyMode::Standard);
        let result = r.redact_text("secret token ABCDEF");
        assert_eq!(result.text.as_deref(), Some("[REDACTED:secret] token ABCDEF"));
        assert!(result.redacted);
    }

    #[test]
    fn standard_mode_passthrough_when_no_rule_matches() {
        let r = make_redactor(PrivacyMode::Standard);
        let result = r.redact_text("nothing interesting here");
        assert_eq!(result.text.as_deref(), Some("nothing interesting here"));
        assert!(!result.redacted);
    }

    #[test]
    fn redact_object_is_idempotent_in_strict_mode() {
        let r = make_redactor(PrivacyMode::Strict);
        let v = serde_json::json!({"a": "secret", "b": [1, "secret", {"c": "x"}]});
        let once = r.redact_value(&v);
        let twice = r.redact_value(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn redact_object_recurses_into_nested_structures() {
        let r = make_redactor(PrivacyMode::Standard);
        let v = serde_json::json!({"a": "secret here", "b": [1, "secret"], "c": 42, "d": null});
        let out = r.redact_value(&v);
        assert_eq!(out["a"], serde_json::json!("[REDACTED:secret] here"));
        assert_eq!(out["b"][1], serde_json::json!("[REDACTED:secret]"));
        assert_eq!(out["c"], serde_json::json!(42));
        assert_eq!(out["d"], serde_json::json!(null));
    }
}
