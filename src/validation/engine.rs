//! Safety Policy Engine
//!
//! Decides whether a candidate query may run. Checks run in a fixed order and
//! stop at the first failure:
//!
//! 1. shape (a single read-only SELECT, optionally behind a CTE chain)
//! 2. table allowlist
//! 3. lexical denylist
//! 4. result-size bound
//! 5. wildcard projection on sensitive tables
//!
//! The engine is a pure function of the query text and the policy: no I/O, no
//! clock, no shared state. Approval returns the text unchanged.

use crate::policy::PolicyConfig;
use crate::sql::{
    parse_statement, ParseFailure, ParsedStatement, QueryBody, QueryNode, Relation, RowLimit,
    StatementKind, TableName,
};
use crate::validation::lexical;
use crate::validation::verdict::{ReasonCode, Rejection, Verdict};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Parse and validate raw query text.
pub fn validate(query: &str, config: &PolicyConfig) -> Verdict {
    let verdict = match parse_statement(query) {
        Ok(statement) => return validate_parsed(query, &statement, config),
        Err(ParseFailure::MultipleStatements(count)) => Rejection::new(
            ReasonCode::MultipleStatements,
            format!("Only a single statement is allowed, found {}", count),
        ),
        Err(failure) => Rejection::new(
            ReasonCode::ParseError,
            format!("Could not parse query: {}", failure),
        ),
    };
    reject(verdict)
}

/// Validate an already-parsed statement. `query` must be the text it was
/// parsed from; it feeds the lexical scan and is returned on approval.
pub fn validate_parsed(query: &str, statement: &ParsedStatement, config: &PolicyConfig) -> Verdict {
    match run_checks(query, statement, config) {
        Ok(()) => {
            debug!("Query approved");
            Verdict::Approved {
                normalized_query: query.to_string(),
            }
        }
        Err(rejection) => reject(rejection),
    }
}

fn reject(rejection: Rejection) -> Verdict {
    warn!(code = %rejection.code, "Query rejected: {}", rejection.message);
    Verdict::Rejected(rejection)
}

fn run_checks(query: &str, statement: &ParsedStatement, config: &PolicyConfig) -> Result<(), Rejection> {
    let root = check_shape(statement)?;
    let tables = check_tables(root, config)?;
    check_lexical(query, config)?;
    let touches_sensitive = tables.iter().any(|t| config.is_sensitive(t));
    check_limit(root, touches_sensitive, config)?;
    check_wildcard(root, touches_sensitive, &tables, config)?;
    Ok(())
}

fn check_shape(statement: &ParsedStatement) -> Result<&QueryNode, Rejection> {
    let root = match &statement.kind {
        StatementKind::Query(root) => root,
        other => {
            return Err(Rejection::new(
                ReasonCode::NotSelect,
                format!("Only SELECT queries are allowed, got a {} statement", other.keyword()),
            ))
        }
    };

    match root.final_body() {
        // final_body never yields Nested
        QueryBody::Select(_) | QueryBody::Nested(_) => {}
        QueryBody::SetOperation { op, .. } => {
            return Err(Rejection::new(
                ReasonCode::NotSelect,
                format!("Top-level {} is not a plain SELECT", op.keyword()),
            ))
        }
        QueryBody::Values => {
            return Err(Rejection::new(
                ReasonCode::NotSelect,
                "VALUES lists are not a SELECT",
            ))
        }
        QueryBody::Mutation(keyword) => {
            return Err(Rejection::new(
                ReasonCode::NotSelect,
                format!("Only SELECT queries are allowed, got {}", keyword),
            ))
        }
        QueryBody::Unsupported(what) => {
            return Err(Rejection::new(
                ReasonCode::UnsupportedConstruct,
                format!("Unsupported query form: {}", what),
            ))
        }
    }

    let queries = root.descendants();

    for query in &queries {
        if query.locks_rows {
            return Err(Rejection::new(
                ReasonCode::NotSelect,
                "Row-locking clauses (FOR UPDATE/SHARE) are not allowed",
            ));
        }
        if let QueryBody::SetOperation { op, .. } = &query.body {
            return Err(Rejection::new(
                ReasonCode::NotSelect,
                format!("Nested {} is not allowed", op.keyword()),
            ));
        }
        if let Some(keyword) = nested_mutation(&query.body) {
            return Err(Rejection::new(
                ReasonCode::NotSelect,
                format!("Data-modifying {} inside a query is not allowed", keyword),
            ));
        }
        for select in query.selects() {
            if let Some(target) = &select.into {
                return Err(Rejection::new(
                    ReasonCode::NotSelect,
                    format!("SELECT ... INTO {} creates a table", target),
                ));
            }
        }
    }

    if let Some(what) = statement.unmodeled.first() {
        return Err(Rejection::new(
            ReasonCode::UnsupportedConstruct,
            format!("Unsupported query construct: {}", what),
        ));
    }
    for query in &queries {
        if let Some(what) = unsupported_in(query) {
            return Err(Rejection::new(
                ReasonCode::UnsupportedConstruct,
                format!("Unsupported query construct: {}", what),
            ));
        }
    }

    Ok(root)
}

fn nested_mutation(body: &QueryBody) -> Option<&str> {
    match body {
        QueryBody::Mutation(keyword) => Some(keyword),
        QueryBody::SetOperation { left, right, .. } => {
            nested_mutation(left).or_else(|| nested_mutation(right))
        }
        _ => None,
    }
}

fn unsupported_in(query: &QueryNode) -> Option<&str> {
    fn in_body(body: &QueryBody) -> Option<&str> {
        match body {
            QueryBody::Unsupported(what) => Some(what),
            QueryBody::SetOperation { left, right, .. } => in_body(left).or_else(|| in_body(right)),
            QueryBody::Select(select) => select.from.iter().find_map(|relation| match relation {
                Relation::Unsupported(what) => Some(what.as_str()),
                _ => None,
            }),
            _ => None,
        }
    }
    in_body(&query.body)
}

/// Returns the allowlisted names of every referenced table.
fn check_tables(root: &QueryNode, config: &PolicyConfig) -> Result<BTreeSet<String>, Rejection> {
    let mut referenced = BTreeSet::new();
    collect_tables(root, &mut Vec::new(), &mut referenced);

    let mut resolved = BTreeSet::new();
    let mut forbidden = BTreeSet::new();
    for name in &referenced {
        match resolve_table(name, config) {
            Some(table) => {
                resolved.insert(table.to_string());
            }
            None => {
                forbidden.insert(name.to_string());
            }
        }
    }

    if !forbidden.is_empty() {
        let names: Vec<String> = forbidden.into_iter().collect();
        return Err(Rejection::new(
            ReasonCode::ForbiddenTable,
            format!("Forbidden tables: {}", names.join(", ")),
        ));
    }
    Ok(resolved)
}

/// Walk every relation reference, skipping names that resolve to a CTE in
/// scope. Non-recursive CTEs only see siblings declared before them.
fn collect_tables<'a>(query: &'a QueryNode, scope: &mut Vec<&'a str>, out: &mut BTreeSet<TableName>) {
    let base = scope.len();
    if query.recursive {
        scope.extend(query.ctes.iter().map(|cte| cte.name.as_str()));
    }
    for cte in &query.ctes {
        collect_tables(&cte.query, scope, out);
        if !query.recursive {
            scope.push(&cte.name);
        }
    }
    collect_body(&query.body, scope, out);
    for sub in &query.subqueries {
        collect_tables(sub, scope, out);
    }
    scope.truncate(base);
}

fn collect_body<'a>(body: &'a QueryBody, scope: &mut Vec<&'a str>, out: &mut BTreeSet<TableName>) {
    match body {
        QueryBody::Select(select) => {
            for relation in &select.from {
                match relation {
                    Relation::Table(name) => {
                        let is_cte = name
                            .as_single()
                            .map(|n| scope.contains(&n))
                            .unwrap_or(false);
                        if !is_cte {
                            out.insert(name.clone());
                        }
                    }
                    Relation::Function(name) => {
                        out.insert(name.clone());
                    }
                    Relation::Derived(sub) => collect_tables(sub, scope, out),
                    Relation::Unsupported(_) => {}
                }
            }
            for sub in &select.subqueries {
                collect_tables(sub, scope, out);
            }
        }
        QueryBody::Nested(sub) => collect_tables(sub, scope, out),
        QueryBody::SetOperation { left, right, .. } => {
            collect_body(left, scope, out);
            collect_body(right, scope, out);
        }
        QueryBody::Values | QueryBody::Mutation(_) | QueryBody::Unsupported(_) => {}
    }
}

/// Map a reference to the allowlisted table it names, if any. A two-part name
/// resolves through the configured default schema.
fn resolve_table<'c>(name: &TableName, config: &'c PolicyConfig) -> Option<&'c str> {
    let lookup = |candidate: &str| config.allowed_tables().get(candidate).map(String::as_str);
    match name.parts.as_slice() {
        [table] => lookup(table.as_str()),
        [schema, table] if config.default_schema() == Some(schema.as_str()) => lookup(table.as_str()),
        _ => lookup(name.to_string().as_str()),
    }
}

fn check_lexical(query: &str, config: &PolicyConfig) -> Result<(), Rejection> {
    match lexical::find_denied(query, config.denied_patterns()) {
        Some(pattern) => Err(Rejection::new(
            ReasonCode::DangerousPattern,
            format!("Query contains forbidden pattern '{}'", pattern),
        )),
        None => Ok(()),
    }
}

fn check_limit(root: &QueryNode, touches_sensitive: bool, config: &PolicyConfig) -> Result<(), Rejection> {
    let max = config.max_limit();
    match root.effective_limit() {
        None if touches_sensitive && config.require_limit_on_sensitive() => Err(Rejection::new(
            ReasonCode::LimitRequired,
            format!("Queries on sensitive tables need an explicit LIMIT (max {})", max),
        )),
        None => Ok(()),
        Some(RowLimit::Expression(text)) => Err(Rejection::new(
            ReasonCode::LimitNotLiteral,
            format!("LIMIT must be an integer literal, got '{}'", text),
        )),
        Some(RowLimit::Literal(n)) if *n <= 0 => Err(Rejection::new(
            ReasonCode::LimitNonpositive,
            format!("LIMIT must be at least 1, got {}", n),
        )),
        Some(RowLimit::Literal(n)) if *n as u64 > max => Err(Rejection::new(
            ReasonCode::LimitTooLarge,
            format!("LIMIT {} exceeds the maximum of {}", n, max),
        )),
        Some(RowLimit::OutOfRange(text)) if text.starts_with('-') => Err(Rejection::new(
            ReasonCode::LimitNonpositive,
            format!("LIMIT must be at least 1, got {}", text),
        )),
        Some(RowLimit::OutOfRange(text)) => Err(Rejection::new(
            ReasonCode::LimitTooLarge,
            format!("LIMIT {} exceeds the maximum of {}", text, max),
        )),
        Some(RowLimit::Literal(_)) => Ok(()),
    }
}

fn check_wildcard(
    root: &QueryNode,
    touches_sensitive: bool,
    tables: &BTreeSet<String>,
    config: &PolicyConfig,
) -> Result<(), Rejection> {
    if !touches_sensitive {
        return Ok(());
    }
    let has_wildcard = root
        .descendants()
        .iter()
        .flat_map(|q| q.selects())
        .any(|select| select.projection.iter().any(|p| p.is_wildcard()));
    if has_wildcard {
        let sensitive: Vec<&str> = tables
            .iter()
            .filter(|t| config.is_sensitive(t))
            .map(String::as_str)
            .collect();
        return Err(Rejection::new(
            ReasonCode::WildcardOnSensitiveTable,
            format!("SELECT * is not allowed on sensitive tables: {}", sensitive.join(", ")),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PolicyConfig {
        PolicyConfig::default()
    }

    fn code(sql: &str) -> Option<ReasonCode> {
        validate(sql, &config()).reason_code()
    }

    #[test]
    fn test_set_operation_at_top_level_is_not_select() {
        assert_eq!(
            code("SELECT symbol FROM dim_tickers UNION SELECT symbol FROM dim_tickers"),
            Some(ReasonCode::NotSelect)
        );
    }

    #[test]
    fn test_nested_set_operations_are_not_select() {
        for sql in [
            "SELECT s FROM (SELECT symbol AS s FROM dim_tickers UNION (SELECT symbol FROM dim_tickers)) x LIMIT 5",
            "SELECT s FROM (SELECT symbol AS s FROM dim_tickers EXCEPT ALL SELECT symbol FROM dim_tickers) x LIMIT 5",
            "SELECT s FROM (SELECT symbol AS s FROM dim_tickers UNION DISTINCT SELECT symbol FROM dim_tickers) x LIMIT 5",
            "SELECT symbol FROM dim_tickers WHERE symbol IN \
             (SELECT symbol FROM dim_tickers INTERSECT ALL SELECT symbol FROM dim_tickers) LIMIT 5",
            "WITH u AS (SELECT symbol FROM dim_tickers UNION ALL (SELECT symbol FROM dim_tickers)) \
             SELECT symbol FROM u LIMIT 5",
        ] {
            assert_eq!(code(sql), Some(ReasonCode::NotSelect), "{}", sql);
        }
    }

    #[test]
    fn test_subqueries_in_unwalked_positions_are_unsupported() {
        for sql in [
            "SELECT symbol, row_number() OVER (ORDER BY (SELECT max(x) FROM secret)) \
             FROM dim_tickers LIMIT 1",
            "SELECT symbol FROM dim_tickers WHERE symbol = ANY(ARRAY(SELECT x FROM secret)) LIMIT 1",
        ] {
            assert_eq!(code(sql), Some(ReasonCode::UnsupportedConstruct), "{}", sql);
        }
    }

    #[test]
    fn test_values_is_not_select() {
        assert_eq!(code("VALUES (1), (2)"), Some(ReasonCode::NotSelect));
    }

    #[test]
    fn test_row_locks_are_not_select() {
        for sql in [
            "SELECT symbol FROM dim_tickers t FOR UPDATE",
            "SELECT symbol FROM dim_tickers LIMIT 1 FOR UPDATE",
            "SELECT symbol FROM dim_tickers WHERE 1 = 1 FOR SHARE",
        ] {
            assert_eq!(code(sql), Some(ReasonCode::NotSelect), "{}", sql);
        }
    }

    #[test]
    fn test_alias_less_lock_still_rejected() {
        // FOR is taken as a table alias here, so the text never parses
        assert_eq!(
            code("SELECT symbol FROM dim_tickers FOR UPDATE"),
            Some(ReasonCode::ParseError)
        );
    }

    #[test]
    fn test_parenthesized_select_is_fine() {
        assert_eq!(code("(SELECT symbol FROM dim_tickers LIMIT 3)"), None);
    }

    #[test]
    fn test_limit_inside_parentheses_bounds_sensitive_read() {
        assert_eq!(code("(SELECT close_price FROM fact_ohlcv LIMIT 3)"), None);
    }

    #[test]
    fn test_default_schema_qualification() {
        assert_eq!(code("SELECT symbol FROM public.dim_tickers"), None);
        assert_eq!(
            code("SELECT symbol FROM other.dim_tickers"),
            Some(ReasonCode::ForbiddenTable)
        );
    }

    #[test]
    fn test_table_names_are_case_sensitive() {
        assert_eq!(code("SELECT symbol FROM \"DIM_TICKERS\""), Some(ReasonCode::ForbiddenTable));
    }

    #[test]
    fn test_table_function_is_checked_against_allowlist() {
        let verdict = validate("SELECT * FROM pg_ls_dir('.')", &config());
        let rejection = verdict.rejection().unwrap();
        assert_eq!(rejection.code, ReasonCode::ForbiddenTable);
        assert!(rejection.message.contains("pg_ls_dir"));
    }

    #[test]
    fn test_non_literal_limit() {
        assert_eq!(
            code("SELECT close_price FROM fact_ohlcv LIMIT 10 + 1"),
            Some(ReasonCode::LimitNotLiteral)
        );
    }

    #[test]
    fn test_limit_bounds_inclusive() {
        assert_eq!(code("SELECT close_price FROM fact_ohlcv LIMIT 500"), None);
        assert_eq!(code("SELECT close_price FROM fact_ohlcv LIMIT 1"), None);
        assert_eq!(
            code("SELECT close_price FROM fact_ohlcv LIMIT 501"),
            Some(ReasonCode::LimitTooLarge)
        );
    }

    #[test]
    fn test_out_of_range_limit_reports_written_literal() {
        let verdict = validate(
            "SELECT close_price FROM fact_ohlcv LIMIT 9223372036854775808",
            &config(),
        );
        let rejection = verdict.rejection().unwrap();
        assert_eq!(rejection.code, ReasonCode::LimitTooLarge);
        assert_eq!(
            rejection.message,
            "LIMIT 9223372036854775808 exceeds the maximum of 500"
        );
    }

    #[test]
    fn test_limit_checked_on_non_sensitive_tables_too() {
        assert_eq!(code("SELECT symbol FROM dim_tickers"), None);
        assert_eq!(
            code("SELECT symbol FROM dim_tickers LIMIT 0"),
            Some(ReasonCode::LimitNonpositive)
        );
    }

    #[test]
    fn test_limit_not_required_when_disabled() {
        let relaxed = config().with_require_limit_on_sensitive(false);
        let verdict = validate("SELECT close_price FROM fact_ohlcv", &relaxed);
        assert!(verdict.is_approved());
    }

    #[test]
    fn test_count_star_is_not_a_wildcard_projection() {
        assert_eq!(code("SELECT count(*) FROM fact_ohlcv LIMIT 1"), None);
    }

    #[test]
    fn test_qualified_wildcard_with_sensitive_join() {
        assert_eq!(
            code(
                "SELECT f.* FROM fact_ohlcv f JOIN dim_tickers t ON t.ticker_id = f.ticker_id LIMIT 5"
            ),
            Some(ReasonCode::WildcardOnSensitiveTable)
        );
    }

    #[test]
    fn test_wildcard_on_non_sensitive_table_is_fine() {
        assert_eq!(code("SELECT * FROM dim_tickers"), None);
    }
}
