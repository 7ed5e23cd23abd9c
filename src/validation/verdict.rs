//! Verdict types produced by the validation engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Enumerable rejection reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    ParseError,
    NotSelect,
    MultipleStatements,
    UnsupportedConstruct,
    ForbiddenTable,
    DangerousPattern,
    LimitRequired,
    LimitNonpositive,
    LimitTooLarge,
    LimitNotLiteral,
    WildcardOnSensitiveTable,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::ParseError => "PARSE_ERROR",
            ReasonCode::NotSelect => "NOT_SELECT",
            ReasonCode::MultipleStatements => "MULTIPLE_STATEMENTS",
            ReasonCode::UnsupportedConstruct => "UNSUPPORTED_CONSTRUCT",
            ReasonCode::ForbiddenTable => "FORBIDDEN_TABLE",
            ReasonCode::DangerousPattern => "DANGEROUS_PATTERN",
            ReasonCode::LimitRequired => "LIMIT_REQUIRED",
            ReasonCode::LimitNonpositive => "LIMIT_NONPOSITIVE",
            ReasonCode::LimitTooLarge => "LIMIT_TOO_LARGE",
            ReasonCode::LimitNotLiteral => "LIMIT_NOT_LITERAL",
            ReasonCode::WildcardOnSensitiveTable => "WILDCARD_ON_SENSITIVE_TABLE",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: ReasonCode,
    pub message: String,
}

impl Rejection {
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Either approval carrying the unchanged query text, or a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Approved { normalized_query: String },
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved { .. })
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Verdict::Approved { .. } => None,
            Verdict::Rejected(rejection) => Some(rejection),
        }
    }

    pub fn reason_code(&self) -> Option<ReasonCode> {
        self.rejection().map(|r| r.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_code_wire_name_matches_as_str() {
        let json = serde_json::to_string(&ReasonCode::WildcardOnSensitiveTable).unwrap();
        assert_eq!(json, "\"WILDCARD_ON_SENSITIVE_TABLE\"");
        let json = serde_json::to_string(&ReasonCode::LimitNonpositive).unwrap();
        assert_eq!(json, format!("\"{}\"", ReasonCode::LimitNonpositive.as_str()));
    }

    #[test]
    fn test_verdict_json_shape() {
        let verdict = Verdict::Rejected(Rejection::new(ReasonCode::NotSelect, "DROP statement"));
        let value = serde_json::to_value(&verdict).unwrap();
        assert_eq!(value["verdict"], "rejected");
        assert_eq!(value["code"], "NOT_SELECT");
        assert_eq!(value["message"], "DROP statement");
    }
}
