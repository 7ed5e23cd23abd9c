//! Structural Query Parser
//!
//! Parses candidate text with `sqlparser` (PostgreSQL dialect) and lowers the
//! AST into [`ParsedStatement`]. Parsing is purely structural: nothing is
//! executed, and every parser failure comes back as a [`ParseFailure`] value.

use crate::sql::statement::*;
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, GroupByExpr, JoinConstraint, JoinOperator, ObjectName,
    Query, Select, SelectItem, SetExpr, SetOperator, Statement, TableFactor, TableWithJoins,
    UnaryOperator, Value, Visit, Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::ops::ControlFlow;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("query is empty")]
    Empty,

    #[error("{0}")]
    Syntax(String),

    #[error("expected exactly one statement, found {0}")]
    MultipleStatements(usize),
}

/// Parse a single SQL statement into the policy model.
pub fn parse_statement(sql: &str) -> Result<ParsedStatement, ParseFailure> {
    if sql.trim().is_empty() {
        return Err(ParseFailure::Empty);
    }

    let dialect = PostgreSqlDialect {};
    let statements =
        Parser::parse_sql(&dialect, sql).map_err(|e| ParseFailure::Syntax(e.to_string()))?;

    let statement = match statements.as_slice() {
        [] => return Err(ParseFailure::Empty),
        [only] => only,
        many => return Err(ParseFailure::MultipleStatements(many.len())),
    };

    Ok(lower_statement(statement))
}

fn lower_statement(statement: &Statement) -> ParsedStatement {
    let keyword = leading_keyword(statement);
    let kind = match statement {
        Statement::Query(query) => {
            let mut lowering = Lowering::default();
            lowering.queries += 1;
            let node = lowering.query(query);
            let unmodeled = lowering.cross_check(statement);
            return ParsedStatement {
                kind: StatementKind::Query(node),
                unmodeled,
            };
        }
        Statement::Insert { .. }
        | Statement::Update { .. }
        | Statement::Delete { .. }
        | Statement::Merge { .. }
        | Statement::Copy { .. } => StatementKind::Mutation(keyword),
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::AlterTable { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. }
        | Statement::Drop { .. }
        | Statement::Truncate { .. } => StatementKind::Schema(keyword),
        Statement::Grant { .. } | Statement::Revoke { .. } => StatementKind::Privilege(keyword),
        Statement::StartTransaction { .. }
        | Statement::SetTransaction { .. }
        | Statement::Commit { .. }
        | Statement::Rollback { .. }
        | Statement::Savepoint { .. } => StatementKind::Transaction(keyword),
        _ => StatementKind::Other(keyword),
    };

    ParsedStatement {
        kind,
        unmodeled: Vec::new(),
    }
}

fn leading_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("UNKNOWN")
        .to_uppercase()
}

fn table_name(name: &ObjectName) -> TableName {
    TableName::new(name.0.iter().map(|ident| ident.value.clone()))
}

/// Counts what the lowering captured so it can be compared against an
/// independent visitor pass over the same AST. `queries` only counts the
/// positions the visitor can see: the statement itself, derived tables and
/// expression subqueries.
#[derive(Default)]
struct Lowering {
    queries: usize,
    relations: usize,
}

impl Lowering {
    fn query(&mut self, query: &Query) -> QueryNode {
        let (recursive, ctes) = match &query.with {
            Some(with) => (
                with.recursive,
                with.cte_tables
                    .iter()
                    .map(|cte| CteNode {
                        name: cte.alias.name.value.clone(),
                        query: self.query(&cte.query),
                    })
                    .collect(),
            ),
            None => (false, Vec::new()),
        };

        let body = self.set_expr(&query.body);

        let mut subqueries = Vec::new();
        for order in &query.order_by {
            self.expr(&order.expr, &mut subqueries);
        }
        if let Some(offset) = &query.offset {
            self.expr(&offset.value, &mut subqueries);
        }

        let limit = match (&query.limit, &query.fetch) {
            (Some(expr), _) => {
                self.expr(expr, &mut subqueries);
                Some(row_limit(expr))
            }
            (None, Some(fetch)) => match &fetch.quantity {
                Some(expr) if fetch.percent => {
                    self.expr(expr, &mut subqueries);
                    Some(RowLimit::Expression(format!("{} PERCENT", expr)))
                }
                Some(expr) => {
                    self.expr(expr, &mut subqueries);
                    Some(row_limit(expr))
                }
                // FETCH FIRST ROW ONLY
                None => Some(RowLimit::Literal(1)),
            },
            (None, None) => None,
        };

        QueryNode {
            recursive,
            ctes,
            body,
            limit,
            locks_rows: !query.locks.is_empty(),
            subqueries,
        }
    }

    fn set_expr(&mut self, set_expr: &SetExpr) -> QueryBody {
        match set_expr {
            SetExpr::Select(select) => QueryBody::Select(self.select(select)),
            SetExpr::Query(query) => QueryBody::Nested(Box::new(self.query(query))),
            SetExpr::SetOperation {
                op, left, right, ..
            } => QueryBody::SetOperation {
                op: match op {
                    SetOperator::Union => SetOp::Union,
                    SetOperator::Except => SetOp::Except,
                    SetOperator::Intersect => SetOp::Intersect,
                },
                left: Box::new(self.set_expr(left)),
                right: Box::new(self.set_expr(right)),
            },
            SetExpr::Values(_) => QueryBody::Values,
            SetExpr::Insert(statement) | SetExpr::Update(statement) => {
                QueryBody::Mutation(leading_keyword(statement))
            }
            SetExpr::Table(_) => QueryBody::Unsupported("TABLE shorthand".to_string()),
        }
    }

    fn select(&mut self, select: &Select) -> SelectNode {
        let mut subqueries = Vec::new();

        let projection = select
            .projection
            .iter()
            .map(|item| match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.expr(expr, &mut subqueries);
                    Projection::Expr
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    Projection::QualifiedWildcard(table_name(name).to_string())
                }
                SelectItem::Wildcard(_) => Projection::Wildcard,
            })
            .collect();

        let mut from = Vec::new();
        for table_with_joins in &select.from {
            self.table_with_joins(table_with_joins, &mut from, &mut subqueries);
        }

        if let Some(selection) = &select.selection {
            self.expr(selection, &mut subqueries);
        }
        if let GroupByExpr::Expressions(exprs) = &select.group_by {
            for expr in exprs {
                self.expr(expr, &mut subqueries);
            }
        }
        if let Some(having) = &select.having {
            self.expr(having, &mut subqueries);
        }

        SelectNode {
            projection,
            from,
            subqueries,
            into: select.into.as_ref().map(|into| table_name(&into.name).to_string()),
        }
    }

    fn table_with_joins(
        &mut self,
        table_with_joins: &TableWithJoins,
        from: &mut Vec<Relation>,
        subqueries: &mut Vec<QueryNode>,
    ) {
        self.table_factor(&table_with_joins.relation, from, subqueries);
        for join in &table_with_joins.joins {
            self.table_factor(&join.relation, from, subqueries);
            let constraint = match &join.join_operator {
                JoinOperator::Inner(c)
                | JoinOperator::LeftOuter(c)
                | JoinOperator::RightOuter(c)
                | JoinOperator::FullOuter(c) => Some(c),
                _ => None,
            };
            if let Some(JoinConstraint::On(expr)) = constraint {
                self.expr(expr, subqueries);
            }
        }
    }

    fn table_factor(
        &mut self,
        factor: &TableFactor,
        from: &mut Vec<Relation>,
        subqueries: &mut Vec<QueryNode>,
    ) {
        match factor {
            TableFactor::Table { name, args, .. } => {
                self.relations += 1;
                if args.is_some() {
                    from.push(Relation::Function(table_name(name)));
                } else {
                    from.push(Relation::Table(table_name(name)));
                }
            }
            TableFactor::Derived { subquery, .. } => {
                self.queries += 1;
                from.push(Relation::Derived(Box::new(self.query(subquery))));
            }
            TableFactor::TableFunction { expr, .. } => {
                let name = match expr {
                    Expr::Function(func) => table_name(&func.name),
                    other => TableName::new([other.to_string()]),
                };
                from.push(Relation::Function(name));
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.table_with_joins(table_with_joins, from, subqueries);
            }
            other => from.push(Relation::Unsupported(other.to_string())),
        }
    }

    /// Collects subqueries reachable through the common composite expression
    /// forms. Anything missed here is caught by the visitor cross-check.
    fn expr(&mut self, expr: &Expr, subqueries: &mut Vec<QueryNode>) {
        match expr {
            Expr::Subquery(query) => {
                self.queries += 1;
                subqueries.push(self.query(query));
            }
            Expr::Exists { subquery, .. } => {
                self.queries += 1;
                subqueries.push(self.query(subquery));
            }
            Expr::InSubquery { expr, subquery, .. } => {
                self.expr(expr, subqueries);
                self.queries += 1;
                subqueries.push(self.query(subquery));
            }
            Expr::BinaryOp { left, right, .. }
            | Expr::IsDistinctFrom(left, right)
            | Expr::IsNotDistinctFrom(left, right) => {
                self.expr(left, subqueries);
                self.expr(right, subqueries);
            }
            Expr::UnaryOp { expr, .. }
            | Expr::Nested(expr)
            | Expr::IsNull(expr)
            | Expr::IsNotNull(expr)
            | Expr::IsTrue(expr)
            | Expr::IsNotTrue(expr)
            | Expr::IsFalse(expr)
            | Expr::IsNotFalse(expr)
            | Expr::IsUnknown(expr)
            | Expr::IsNotUnknown(expr)
            | Expr::Cast { expr, .. }
            | Expr::Extract { expr, .. } => self.expr(expr, subqueries),
            Expr::AtTimeZone { timestamp, .. } => self.expr(timestamp, subqueries),
            Expr::Like { expr, pattern, .. }
            | Expr::ILike { expr, pattern, .. }
            | Expr::SimilarTo { expr, pattern, .. } => {
                self.expr(expr, subqueries);
                self.expr(pattern, subqueries);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.expr(expr, subqueries);
                self.expr(low, subqueries);
                self.expr(high, subqueries);
            }
            Expr::InList { expr, list, .. } => {
                self.expr(expr, subqueries);
                for item in list {
                    self.expr(item, subqueries);
                }
            }
            Expr::Tuple(items) => {
                for item in items {
                    self.expr(item, subqueries);
                }
            }
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                if let Some(operand) = operand {
                    self.expr(operand, subqueries);
                }
                for (condition, result) in conditions.iter().zip(results.iter()) {
                    self.expr(condition, subqueries);
                    self.expr(result, subqueries);
                }
                if let Some(else_result) = else_result {
                    self.expr(else_result, subqueries);
                }
            }
            Expr::Function(func) => {
                for arg in &func.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
                        | FunctionArg::Named {
                            arg: FunctionArgExpr::Expr(expr),
                            ..
                        } => self.expr(expr, subqueries),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    /// Compare against a full visitor pass; report anything the lowering skipped.
    fn cross_check(&self, statement: &Statement) -> Vec<String> {
        let mut counter = NodeCounter::default();
        let _ = statement.visit(&mut counter);

        let mut unmodeled = Vec::new();
        if counter.queries > self.queries {
            unmodeled.push(format!(
                "{} subquer{} in an unsupported position",
                counter.queries - self.queries,
                if counter.queries - self.queries == 1 { "y" } else { "ies" }
            ));
        }
        if counter.relations > self.relations {
            unmodeled.push(format!(
                "{} relation reference(s) in an unsupported position",
                counter.relations - self.relations
            ));
        }
        if !unmodeled.is_empty() {
            debug!(
                "Lowering captured {}/{} queries and {}/{} relations",
                self.queries, counter.queries, self.relations, counter.relations
            );
        }
        unmodeled
    }
}

#[derive(Default)]
struct NodeCounter {
    queries: usize,
    relations: usize,
}

impl Visitor for NodeCounter {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        if let Statement::Query(_) = statement {
            self.queries += 1;
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Derived { .. } = factor {
            self.queries += 1;
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Subquery(_)
            | Expr::Exists { .. }
            | Expr::InSubquery { .. }
            | Expr::ArraySubquery(_) => self.queries += 1,
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, _relation: &ObjectName) -> ControlFlow<Self::Break> {
        self.relations += 1;
        ControlFlow::Continue(())
    }
}

fn row_limit(expr: &Expr) -> RowLimit {
    match expr {
        Expr::Value(Value::Number(digits, _)) => integer_literal(digits, false),
        Expr::Nested(inner) => row_limit(inner),
        Expr::UnaryOp { op, expr: inner } => match (op, inner.as_ref()) {
            (UnaryOperator::Minus, Expr::Value(Value::Number(digits, _))) => {
                integer_literal(digits, true)
            }
            (UnaryOperator::Plus, Expr::Value(Value::Number(digits, _))) => {
                integer_literal(digits, false)
            }
            _ => RowLimit::Expression(expr.to_string()),
        },
        other => RowLimit::Expression(other.to_string()),
    }
}

fn integer_literal(digits: &str, negative: bool) -> RowLimit {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        let sign = if negative { "-" } else { "" };
        return RowLimit::Expression(format!("{}{}", sign, digits));
    }
    match digits.parse::<i64>() {
        Ok(value) if negative => RowLimit::Literal(-value),
        Ok(value) => RowLimit::Literal(value),
        Err(_) if negative => RowLimit::OutOfRange(format!("-{}", digits)),
        Err(_) => RowLimit::OutOfRange(digits.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_of(sql: &str) -> QueryNode {
        match parse_statement(sql).unwrap().kind {
            StatementKind::Query(q) => q,
            other => panic!("expected query, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        assert_eq!(parse_statement("   "), Err(ParseFailure::Empty));
        assert!(matches!(parse_statement("SELEC 1 FRM"), Err(ParseFailure::Syntax(_))));
    }

    #[test]
    fn test_counts_statements() {
        assert_eq!(
            parse_statement("SELECT 1; SELECT 2"),
            Err(ParseFailure::MultipleStatements(2))
        );
        assert!(parse_statement("SELECT 1;").is_ok());
    }

    #[test]
    fn test_classifies_non_queries() {
        let drop = parse_statement("DROP TABLE fact_ohlcv").unwrap();
        assert_eq!(drop.kind, StatementKind::Schema("DROP".to_string()));
        let insert = parse_statement("INSERT INTO dim_tickers (symbol) VALUES ('X')").unwrap();
        assert_eq!(insert.kind, StatementKind::Mutation("INSERT".to_string()));
        let commit = parse_statement("COMMIT").unwrap();
        assert_eq!(commit.kind, StatementKind::Transaction("COMMIT".to_string()));
    }

    #[test]
    fn test_limit_literals() {
        assert_eq!(query_of("SELECT 1 LIMIT 10").limit, Some(RowLimit::Literal(10)));
        assert_eq!(query_of("SELECT 1 LIMIT -3").limit, Some(RowLimit::Literal(-3)));
        assert_eq!(query_of("SELECT 1 LIMIT ALL").limit, None);
        assert_eq!(
            query_of("SELECT 1 LIMIT 99999999999999999999999").limit,
            Some(RowLimit::OutOfRange("99999999999999999999999".to_string()))
        );
        assert_eq!(
            query_of("SELECT 1 LIMIT -99999999999999999999999").limit,
            Some(RowLimit::OutOfRange("-99999999999999999999999".to_string()))
        );
        assert!(matches!(
            query_of("SELECT 1 LIMIT 2 * 3").limit,
            Some(RowLimit::Expression(_))
        ));
        assert_eq!(
            query_of("SELECT 1 FETCH FIRST 7 ROWS ONLY").limit,
            Some(RowLimit::Literal(7))
        );
    }

    #[test]
    fn test_joins_and_subqueries_are_lowered() {
        let q = query_of(
            "SELECT f.close_price FROM fact_ohlcv f \
             JOIN dim_tickers t ON t.ticker_id = f.ticker_id \
             WHERE f.date IN (SELECT d.date FROM dimtime d) LIMIT 5",
        );
        let select = &q.selects()[0];
        assert_eq!(
            select.from,
            vec![
                Relation::Table(TableName::new(["fact_ohlcv"])),
                Relation::Table(TableName::new(["dim_tickers"])),
            ]
        );
        assert_eq!(select.subqueries.len(), 1);
    }

    #[test]
    fn test_cte_names_recorded() {
        let q = query_of("WITH latest AS (SELECT max(date) AS d FROM dimtime) SELECT d FROM latest");
        assert_eq!(q.ctes.len(), 1);
        assert_eq!(q.ctes[0].name, "latest");
        assert!(!q.recursive);
    }

    #[test]
    fn test_wildcards_recorded() {
        let q = query_of("SELECT t.*, count(*) FROM dim_tickers t GROUP BY 1");
        assert_eq!(
            q.selects()[0].projection,
            vec![Projection::QualifiedWildcard("t".to_string()), Projection::Expr]
        );
    }

    #[test]
    fn test_nested_queries_fully_modeled() {
        let parsed = parse_statement(
            "WITH latest AS (SELECT symbol FROM (SELECT symbol FROM fact_ohlcv) f) \
             SELECT symbol FROM latest \
             WHERE EXISTS (SELECT 1 FROM dimtime) \
             AND symbol IN (SELECT symbol FROM dim_tickers) \
             AND 1 < (SELECT count(*) FROM dim_tickers) LIMIT 5",
        )
        .unwrap();
        assert!(parsed.unmodeled.is_empty(), "{:?}", parsed.unmodeled);
    }

    #[test]
    fn test_subquery_in_window_clause_is_unmodeled() {
        let parsed = parse_statement(
            "SELECT symbol, row_number() OVER (ORDER BY (SELECT max(x) FROM secret)) \
             FROM dim_tickers LIMIT 1",
        )
        .unwrap();
        assert_eq!(parsed.unmodeled, vec!["1 subquery in an unsupported position".to_string()]);
    }

    #[test]
    fn test_plain_query_fully_modeled() {
        let parsed = parse_statement(
            "SELECT open_price FROM fact_ohlcv WHERE symbol='NVDA' ORDER BY date DESC LIMIT 1",
        )
        .unwrap();
        assert!(parsed.unmodeled.is_empty());
    }

    #[test]
    fn test_select_into_and_locks() {
        let q = query_of("SELECT symbol INTO backup FROM dim_tickers");
        assert_eq!(q.selects()[0].into.as_deref(), Some("backup"));
        let q = query_of("SELECT symbol FROM dim_tickers t FOR UPDATE");
        assert!(q.locks_rows);
        let q = query_of("SELECT symbol FROM dim_tickers LIMIT 1 FOR SHARE");
        assert!(q.locks_rows);
    }
}
