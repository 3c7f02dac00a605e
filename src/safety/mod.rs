//! SQL safety validation: injection detection, identifier validation and
//! operation whitelisting.
//!
//! Every candidate SQL statement — whether synthesised by the query builder
//! or submitted verbatim — passes through here before it reaches the
//! executor. Natural-language prompts are scanned with the same signal set
//! before any language-model call is made.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::config::{SafetyConfig, SqlOperation};

/// Coarse classification of a SQL statement by its leading verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlClass {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl SqlClass {
    fn matches(self, op: SqlOperation) -> bool {
        matches!(
            (self, op),
            (SqlClass::Select, SqlOperation::Select)
                | (SqlClass::Insert, SqlOperation::Insert)
                | (SqlClass::Update, SqlOperation::Update)
                | (SqlClass::Delete, SqlOperation::Delete)
                | (SqlClass::Other, SqlOperation::Other)
        )
    }
}

struct InjectionSignal {
    name: &'static str,
    pattern: Lazy<Regex>,
}

macro_rules! signal {
    ($name:expr, $re:expr) => {
        InjectionSignal {
            name: $name,
            pattern: Lazy::new(|| Regex::new($re).expect("static injection pattern")),
        }
    };
}

// Each entry names one of the non-exhaustive signals in §4.1. Patterns are
// matched case-insensitively against the upper-cased statement.
static SIGNALS: &[InjectionSignal] = &[
    signal!("chained destructive statement", r";\s*(DROP|DELETE|TRUNCATE|ALTER|CREATE|GRANT|REVOKE)\s+"),
    signal!("trailing line comment", r"--[^\r\n]*$"),
    signal!("block comment", r"/\*.*?\*/"),
    signal!("union select", r"UNION\s+SELECT"),
    signal!("tautology (numeric)", r"\b\d+\s*=\s*\d+\b"),
    signal!("tautology (or 1=1)", r"OR\s+1\s*=\s*1"),
    signal!("tautology (string)", r"OR\s+'[^']*'\s*=\s*'[^']*'"),
    signal!("hex literal", r"0X[0-9A-F]+"),
    signal!("char() nesting", r"CHAR\s*\(\s*\d+"),
    signal!("timing attack", r"WAITFOR\s+DELAY|SLEEP\s*\(|BENCHMARK\s*\("),
    signal!("dynamic execution", r"\bEXEC\s*\(|\bEXECUTE\s+|XP_CMDSHELL|SP_EXECUTESQL"),
];

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier pattern"));

static RESERVED_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "GRANT", "REVOKE",
        "UNION", "WHERE", "FROM", "TABLE", "INTO", "VALUES", "JOIN", "ORDER", "GROUP", "HAVING",
    ]
    .into_iter()
    .collect()
});

/// Classifies, validates and scans SQL and free-form text for injection signals.
///
/// Stateless by design: every operation is a pure function of its input, so
/// instances are cheap to share across tasks.
#[derive(Debug, Clone, Default)]
pub struct SafetyValidator {
    config: SafetyConfig,
}

impl SafetyValidator {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    /// Classifies a statement by its leading verb.
    pub fn classify(&self, sql: &str) -> SqlClass {
        let trimmed = sql.trim_start();
        let upper_prefix: String = trimmed
            .chars()
            .take(16)
            .collect::<String>()
            .to_uppercase();

        if upper_prefix.starts_with("SELECT") {
            SqlClass::Select
        } else if upper_prefix.starts_with("INSERT") {
            SqlClass::Insert
        } else if upper_prefix.starts_with("UPDATE") {
            SqlClass::Update
        } else if upper_prefix.starts_with("DELETE") {
            SqlClass::Delete
        } else {
            SqlClass::Other
        }
    }

    /// Detects injection signals in `text`, returning the names of every
    /// signal that fired. Order is the declaration order of [`SIGNALS`],
    /// independent of any particular match order within the text.
    pub fn detect_injection(&self, text: &str) -> Vec<&'static str> {
        let upper = text.to_uppercase();
        let mut hits: Vec<&'static str> = SIGNALS
            .iter()
            .filter(|s| s.pattern.is_match(&upper))
            .map(|s| s.name)
            .collect();

        if text.matches(';').count() > 1 {
            hits.push("multiple statement separators");
        }

        hits
    }

    /// Validates a SQL statement against the configured operation whitelist
    /// and the injection signal set. Returns `Ok(())` or a human-readable
    /// rejection reason.
    pub fn validate(&self, sql: &str) -> Result<(), String> {
        if sql.is_empty() {
            return Err("empty query".to_string());
        }
        if sql.len() > self.config.max_sql_length {
            return Err(format!(
                "query too long: {} characters exceeds limit of {}",
                sql.len(),
                self.config.max_sql_length
            ));
        }

        let signals = self.detect_injection(sql);
        if !signals.is_empty() {
            return Err(format!(
                "potentially dangerous SQL patterns detected: {}",
                signals.join(", ")
            ));
        }

        let class = self.classify(sql);
        let allowed = self
            .config
            .allowed_operations
            .iter()
            .any(|op| class.matches(*op));
        if !allowed {
            return Err(format!("operation {class:?} is not in the allowed set"));
        }

        Ok(())
    }

    /// Scans free-form natural-language input for the same injection
    /// signals used on SQL, and enforces the prompt length limit.
    pub fn validate_prompt(&self, text: &str) -> Result<(), String> {
        if text.trim().is_empty() {
            return Err("empty prompt".to_string());
        }
        if text.len() > self.config.max_prompt_length {
            return Err(format!(
                "prompt too long: {} characters exceeds limit of {}",
                text.len(),
                self.config.max_prompt_length
            ));
        }
        let signals = self.detect_injection(text);
        if !signals.is_empty() {
            return Err(format!(
                "potentially dangerous input detected: {}",
                signals.join(", ")
            ));
        }
        Ok(())
    }

    /// Validates a bare identifier (table or column name).
    pub fn validate_identifier(&self, name: &str) -> bool {
        if name.is_empty() || name.len() > 63 {
            return false;
        }
        if !IDENTIFIER_RE.is_match(name) {
            return false;
        }
        !RESERVED_KEYWORDS.contains(name.to_uppercase().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SafetyValidator {
        SafetyValidator::new(SafetyConfig::default())
    }

    #[test]
    fn classifies_select() {
        assert_eq!(validator().classify("  select * from users"), SqlClass::Select);
    }

    #[test]
    fn rejects_chained_drop() {
        let v = validator();
        let sql = "SELECT 1; DROP TABLE users";
        assert!(v.validate(sql).is_err());
        assert!(!v.detect_injection(sql).is_empty());
    }

    #[test]
    fn rejects_union_select_injection() {
        let v = validator();
        let sql = "SELECT id FROM users WHERE id = 1 UNION SELECT password FROM admins";
        assert!(v.validate(sql).is_err());
    }

    #[test]
    fn accepts_plain_select() {
        let v = validator();
        assert!(v.validate("SELECT id, name FROM users WHERE id = 1").is_ok());
    }

    #[test]
    fn identifier_rules() {
        let v = validator();
        assert!(v.validate_identifier("user_id"));
        assert!(!v.validate_identifier("1bad"));
        assert!(!v.validate_identifier("select"));
        assert!(!v.validate_identifier(&"x".repeat(64)));
    }

    #[test]
    fn rejects_natural_language_injection_before_any_sql() {
        let v = validator();
        let prompt = "show users'; DROP TABLE users; --";
        assert!(v.validate_prompt(prompt).is_err());
    }

    #[test]
    fn classify_is_deterministic_over_allowed_set() {
        let v = validator();
        for (sql, expected) in [
            ("SELECT 1", SqlClass::Select),
            ("INSERT INTO t VALUES (1)", SqlClass::Insert),
            ("UPDATE t SET x = 1", SqlClass::Update),
            ("DELETE FROM t", SqlClass::Delete),
        ] {
            assert_eq!(v.classify(sql), expected);
        }
    }
}
