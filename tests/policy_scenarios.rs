use nl2sql_gate::{validate, PolicyConfig, ReasonCode, Verdict};

fn stock_policy() -> PolicyConfig {
    PolicyConfig::default()
}

fn reason(sql: &str) -> Option<ReasonCode> {
    validate(sql, &stock_policy()).reason_code()
}

#[test]
fn test_latest_open_price_is_approved() {
    let sql = "SELECT open_price FROM fact_ohlcv WHERE symbol='NVDA' ORDER BY date DESC LIMIT 1";
    let verdict = validate(sql, &stock_policy());
    assert_eq!(
        verdict,
        Verdict::Approved {
            normalized_query: sql.to_string()
        }
    );
}

#[test]
fn test_missing_limit_reported_before_wildcard() {
    assert_eq!(reason("SELECT * FROM fact_ohlcv"), Some(ReasonCode::LimitRequired));
}

#[test]
fn test_wildcard_on_sensitive_table() {
    assert_eq!(
        reason("SELECT * FROM fact_ohlcv LIMIT 10"),
        Some(ReasonCode::WildcardOnSensitiveTable)
    );
}

#[test]
fn test_drop_table_is_not_select() {
    assert_eq!(reason("DROP TABLE fact_ohlcv"), Some(ReasonCode::NotSelect));
}

#[test]
fn test_unknown_table_is_forbidden() {
    let verdict = validate("SELECT symbol FROM secret_table LIMIT 5", &stock_policy());
    let rejection = verdict.rejection().unwrap();
    assert_eq!(rejection.code, ReasonCode::ForbiddenTable);
    assert!(rejection.message.contains("secret_table"));
}

#[test]
fn test_forbidden_tables_listed_sorted() {
    let sql = "SELECT z.x FROM zeta z \
               JOIN alpha a ON a.id = z.id \
               JOIN dim_tickers d ON d.symbol = z.symbol LIMIT 5";
    let verdict = validate(sql, &stock_policy());
    let rejection = verdict.rejection().unwrap();
    assert_eq!(rejection.code, ReasonCode::ForbiddenTable);
    assert_eq!(rejection.message, "Forbidden tables: alpha, zeta");
}

#[test]
fn test_mutations_are_not_select() {
    for sql in [
        "INSERT INTO dim_tickers (symbol) VALUES ('X')",
        "UPDATE fact_ohlcv SET close_price = 0",
        "DELETE FROM dimtime",
        "TRUNCATE fact_ohlcv",
        "ALTER TABLE dim_tickers ADD COLUMN note TEXT",
        "CREATE TABLE copy_of AS SELECT symbol FROM dim_tickers",
        "GRANT SELECT ON fact_ohlcv TO public",
        "UPDATE secret_table SET x = 1",
    ] {
        assert_eq!(reason(sql), Some(ReasonCode::NotSelect), "{}", sql);
    }
}

#[test]
fn test_top_level_union_is_not_select() {
    assert_eq!(
        reason("SELECT symbol FROM dim_tickers UNION SELECT symbol FROM fact_ohlcv LIMIT 5"),
        Some(ReasonCode::NotSelect)
    );
}

#[test]
fn test_cte_names_are_not_tables() {
    let sql = "WITH latest AS (SELECT symbol, MAX(date) AS d FROM fact_ohlcv GROUP BY symbol) \
               SELECT symbol, d FROM latest LIMIT 10";
    assert!(validate(sql, &stock_policy()).is_approved());
}

#[test]
fn test_tables_inside_cte_bodies_are_checked() {
    let sql = "WITH leak AS (SELECT secret FROM vault) SELECT secret FROM leak LIMIT 10";
    let verdict = validate(sql, &stock_policy());
    assert_eq!(verdict.reason_code(), Some(ReasonCode::ForbiddenTable));
    assert!(verdict.rejection().unwrap().message.contains("vault"));
}

#[test]
fn test_subquery_tables_are_checked() {
    assert_eq!(
        reason("SELECT symbol FROM dim_tickers WHERE symbol IN (SELECT symbol FROM watchlist) LIMIT 5"),
        Some(ReasonCode::ForbiddenTable)
    );
    assert_eq!(
        reason(
            "SELECT symbol FROM dim_tickers t \
             WHERE EXISTS (SELECT 1 FROM audit_log a WHERE a.symbol = t.symbol) LIMIT 5"
        ),
        Some(ReasonCode::ForbiddenTable)
    );
}

#[test]
fn test_data_modifying_with_is_not_select() {
    assert_eq!(
        reason("WITH src AS (SELECT symbol FROM dim_tickers) INSERT INTO dim_tickers SELECT symbol FROM src"),
        Some(ReasonCode::NotSelect)
    );
}

#[test]
fn test_select_into_is_not_select() {
    assert_eq!(
        reason("SELECT symbol INTO backup_tickers FROM dim_tickers"),
        Some(ReasonCode::NotSelect)
    );
}

#[test]
fn test_multiple_statements() {
    assert_eq!(
        reason("SELECT symbol FROM dim_tickers LIMIT 1; DROP TABLE fact_ohlcv"),
        Some(ReasonCode::MultipleStatements)
    );
}

#[test]
fn test_unparseable_text() {
    assert_eq!(reason("SELEC symbol FRM dim_tickers"), Some(ReasonCode::ParseError));
    assert_eq!(reason("   "), Some(ReasonCode::ParseError));
}

#[test]
fn test_sensitive_limit_bounds() {
    assert_eq!(
        reason("SELECT close_price FROM fact_ohlcv LIMIT 0"),
        Some(ReasonCode::LimitNonpositive)
    );
    assert_eq!(
        reason("SELECT close_price FROM fact_ohlcv LIMIT -1"),
        Some(ReasonCode::LimitNonpositive)
    );
    assert_eq!(
        reason("SELECT close_price FROM fact_ohlcv LIMIT 501"),
        Some(ReasonCode::LimitTooLarge)
    );
    assert_eq!(reason("SELECT close_price FROM fact_ohlcv LIMIT 500"), None);
}

#[test]
fn test_comment_injection_is_dangerous() {
    assert_eq!(
        reason("SELECT symbol FROM dim_tickers LIMIT 5 -- trailing"),
        Some(ReasonCode::DangerousPattern)
    );
    assert_eq!(
        reason("SELECT pg_sleep(10) FROM dim_tickers LIMIT 1"),
        Some(ReasonCode::DangerousPattern)
    );
}

#[test]
fn test_validation_is_idempotent() {
    let policy = stock_policy();
    for sql in [
        "SELECT * FROM fact_ohlcv",
        "SELECT symbol FROM dim_tickers LIMIT 3",
        "DROP TABLE fact_ohlcv",
        "not sql at all",
    ] {
        assert_eq!(validate(sql, &policy), validate(sql, &policy));
    }
}

#[test]
fn test_policy_file_overrides_allowlist() {
    let dir = std::env::temp_dir().join(format!("nl2sql-gate-policy-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("policy.json");
    std::fs::write(
        &path,
        r#"{"allowed_tables": ["watchlist"], "sensitive_tables": [], "max_limit": 50}"#,
    )
    .unwrap();

    let policy = PolicyConfig::load(&path).unwrap();
    assert!(validate("SELECT symbol FROM watchlist LIMIT 50", &policy).is_approved());
    assert_eq!(
        validate("SELECT symbol FROM watchlist LIMIT 51", &policy).reason_code(),
        Some(ReasonCode::LimitTooLarge)
    );
    assert_eq!(
        validate("SELECT symbol FROM dim_tickers LIMIT 5", &policy).reason_code(),
        Some(ReasonCode::ForbiddenTable)
    );

    std::fs::remove_dir_all(&dir).ok();
}
