//! Health check query whitelist
//!
//! The probe only ever executes a [`HealthQuery`], and the only way to build
//! one is through [`HealthQuery::parse`], which runs once at startup.

use std::fmt;

use super::ConfigError;

/// Query executed when none is configured
pub const DEFAULT_HEALTH_QUERY: &str = "SELECT 1 AS health_check";

/// Statements that are never allowed to appear in a health check query
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE", "EXEC",
    "EXECUTE", "COPY", "CALL", "DO", "MERGE", "VACUUM", "LOCK",
];

/// A health check query that passed the safe-query whitelist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthQuery(String);

impl HealthQuery {
    /// Validate `sql` against the whitelist
    pub fn parse(sql: &str) -> Result<Self, ConfigError> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err(invalid("health check query cannot be empty"));
        }

        // A single trailing semicolon is tolerated, any other is a second statement
        let body = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
        if body.contains(';') {
            return Err(invalid(
                "health check query cannot contain multiple statements",
            ));
        }

        let mut tokens = body
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
            .map(|t| t.to_ascii_uppercase());

        if tokens.next().as_deref() != Some("SELECT") {
            return Err(invalid("health check query must be a SELECT statement"));
        }

        if let Some(keyword) = tokens.find(|t| FORBIDDEN_KEYWORDS.contains(&t.as_str())) {
            return Err(invalid(format!(
                "health check query cannot contain '{}'",
                keyword
            )));
        }

        Ok(Self(body.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for HealthQuery {
    fn default() -> Self {
        Self(DEFAULT_HEALTH_QUERY.to_string())
    }
}

impl fmt::Display for HealthQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: "monitor.health_check_query",
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query_is_valid() {
        let query = HealthQuery::parse(DEFAULT_HEALTH_QUERY).unwrap();
        assert_eq!(query, HealthQuery::default());
    }

    #[test]
    fn test_trailing_semicolon_stripped() {
        let query = HealthQuery::parse("  select 1;  ").unwrap();
        assert_eq!(query.as_str(), "select 1");
    }

    #[test]
    fn test_rejects_non_select() {
        assert!(HealthQuery::parse("DELETE FROM users").is_err());
        assert!(HealthQuery::parse("WITH x AS (SELECT 1) SELECT * FROM x").is_err());
        assert!(HealthQuery::parse("").is_err());
        assert!(HealthQuery::parse("   ").is_err());
    }

    #[test]
    fn test_rejects_forbidden_keywords() {
        for sql in [
            "SELECT 1; DROP TABLE users",
            "SELECT * FROM t WHERE x IN (DELETE FROM y RETURNING 1)",
            "select pg_sleep(1) union select 1 from (update t set a=1) s",
            "SELECT 1 FROM t FOR UPDATE",
        ] {
            assert!(HealthQuery::parse(sql).is_err(), "accepted: {sql}");
        }
    }

    #[test]
    fn test_rejects_multiple_statements() {
        let err = HealthQuery::parse("SELECT 1; SELECT 2").unwrap_err();
        assert!(err.to_string().contains("multiple statements"));
    }

    #[test]
    fn test_keyword_inside_identifier_allowed() {
        // whole-token match, so column names containing a keyword are fine
        let query = HealthQuery::parse("SELECT 1 AS updated_at_check").unwrap();
        assert_eq!(query.as_str(), "SELECT 1 AS updated_at_check");
    }
}
