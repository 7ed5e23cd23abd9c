//! Parsed Statement Model
//!
//! A closed tree of the node kinds the safety checks reason about. Everything
//! the lowering does not model explicitly lands in an `Unsupported` variant so
//! it is triaged (and rejected) instead of silently passed through.

use serde::Serialize;
use std::fmt;

/// One parsed SQL statement, owned by a single validation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedStatement {
    pub kind: StatementKind,
    /// Query or relation nodes present in the raw syntax tree that the
    /// lowering could not place (e.g. a subquery inside an exotic expression).
    pub unmodeled: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StatementKind {
    Query(QueryNode),
    /// INSERT, UPDATE, DELETE, MERGE, COPY
    Mutation(String),
    /// CREATE, ALTER, DROP, TRUNCATE
    Schema(String),
    /// GRANT, REVOKE
    Privilege(String),
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT, SET TRANSACTION
    Transaction(String),
    Other(String),
}

impl StatementKind {
    /// Leading keyword, for rejection messages.
    pub fn keyword(&self) -> &str {
        match self {
            StatementKind::Query(_) => "SELECT",
            StatementKind::Mutation(k)
            | StatementKind::Schema(k)
            | StatementKind::Privilege(k)
            | StatementKind::Transaction(k)
            | StatementKind::Other(k) => k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryNode {
    pub recursive: bool,
    pub ctes: Vec<CteNode>,
    pub body: QueryBody,
    pub limit: Option<RowLimit>,
    /// FOR UPDATE / FOR SHARE
    pub locks_rows: bool,
    /// Subqueries found in ORDER BY, OFFSET and LIMIT expressions.
    pub subqueries: Vec<QueryNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CteNode {
    pub name: String,
    pub query: QueryNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueryBody {
    Select(SelectNode),
    Nested(Box<QueryNode>),
    SetOperation {
        op: SetOp,
        left: Box<QueryBody>,
        right: Box<QueryBody>,
    },
    Values,
    /// A data-modifying statement used as a query body, e.g. inside a CTE.
    Mutation(String),
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SetOp {
    Union,
    Except,
    Intersect,
}

impl SetOp {
    pub fn keyword(&self) -> &'static str {
        match self {
            SetOp::Union => "UNION",
            SetOp::Except => "EXCEPT",
            SetOp::Intersect => "INTERSECT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectNode {
    pub projection: Vec<Projection>,
    /// FROM items with their joins flattened in source order.
    pub from: Vec<Relation>,
    /// Subqueries found in projection, WHERE, GROUP BY, HAVING and join conditions.
    pub subqueries: Vec<QueryNode>,
    /// SELECT ... INTO creates a table.
    pub into: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Projection {
    Wildcard,
    QualifiedWildcard(String),
    Expr,
}

impl Projection {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Projection::Wildcard | Projection::QualifiedWildcard(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Relation {
    Table(TableName),
    Derived(Box<QueryNode>),
    /// Table-valued function call, named like a relation.
    Function(TableName),
    Unsupported(String),
}

/// Possibly schema-qualified relation name, one entry per identifier part.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TableName {
    pub parts: Vec<String>,
}

impl TableName {
    pub fn new(parts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// The bare name when unqualified.
    pub fn as_single(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

/// A LIMIT (or FETCH FIRST) clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RowLimit {
    Literal(i64),
    /// Integer literal outside the i64 range, kept as written (sign included).
    OutOfRange(String),
    Expression(String),
}

impl QueryNode {
    /// Queries nested directly under this one: CTE bodies, parenthesized
    /// bodies, derived tables and expression subqueries.
    pub fn children(&self) -> Vec<&QueryNode> {
        let mut out: Vec<&QueryNode> = self.ctes.iter().map(|c| &c.query).collect();
        self.body.push_children(&mut out);
        out.extend(self.subqueries.iter());
        out
    }

    /// This query and every query nested anywhere below it, depth-first.
    pub fn descendants(&self) -> Vec<&QueryNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(q) = stack.pop() {
            out.push(q);
            let mut children = q.children();
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// SELECT blocks forming this query's own body (through set operations,
    /// not into parenthesized subqueries).
    pub fn selects(&self) -> Vec<&SelectNode> {
        let mut out = Vec::new();
        self.body.push_selects(&mut out);
        out
    }

    /// Innermost body once parenthesized nesting is peeled off.
    pub fn final_body(&self) -> &QueryBody {
        match &self.body {
            QueryBody::Nested(inner) => inner.final_body(),
            other => other,
        }
    }

    /// The row limit bounding this query's output: its own clause, or that of
    /// a parenthesized body when the outer query has none.
    pub fn effective_limit(&self) -> Option<&RowLimit> {
        match (&self.limit, &self.body) {
            (Some(limit), _) => Some(limit),
            (None, QueryBody::Nested(inner)) => inner.effective_limit(),
            (None, _) => None,
        }
    }
}

impl QueryBody {
    fn push_children<'a>(&'a self, out: &mut Vec<&'a QueryNode>) {
        match self {
            QueryBody::Select(select) => {
                for relation in &select.from {
                    if let Relation::Derived(q) = relation {
                        out.push(q);
                    }
                }
                out.extend(select.subqueries.iter());
            }
            QueryBody::Nested(q) => out.push(q),
            QueryBody::SetOperation { left, right, .. } => {
                left.push_children(out);
                right.push_children(out);
            }
            QueryBody::Values | QueryBody::Mutation(_) | QueryBody::Unsupported(_) => {}
        }
    }

    fn push_selects<'a>(&'a self, out: &mut Vec<&'a SelectNode>) {
        match self {
            QueryBody::Select(select) => out.push(select),
            QueryBody::SetOperation { left, right, .. } => {
                left.push_selects(out);
                right.push_selects(out);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select_from(tables: &[&str]) -> QueryNode {
        QueryNode {
            recursive: false,
            ctes: Vec::new(),
            body: QueryBody::Select(SelectNode {
                projection: vec![Projection::Expr],
                from: tables.iter().map(|t| Relation::Table(TableName::new([*t]))).collect(),
                subqueries: Vec::new(),
                into: None,
            }),
            limit: None,
            locks_rows: false,
            subqueries: Vec::new(),
        }
    }

    #[test]
    fn test_descendants_include_derived_and_ctes() {
        let mut outer = select_from(&["a"]);
        outer.ctes.push(CteNode {
            name: "c".to_string(),
            query: select_from(&["b"]),
        });
        if let QueryBody::Select(select) = &mut outer.body {
            select.from.push(Relation::Derived(Box::new(select_from(&["d"]))));
        }
        assert_eq!(outer.descendants().len(), 3);
    }

    #[test]
    fn test_effective_limit_through_parentheses() {
        let mut inner = select_from(&["a"]);
        inner.limit = Some(RowLimit::Literal(5));
        let mut outer = select_from(&[]);
        outer.body = QueryBody::Nested(Box::new(inner));
        assert_eq!(outer.effective_limit(), Some(&RowLimit::Literal(5)));
    }

    #[test]
    fn test_table_name_display() {
        assert_eq!(TableName::new(["public", "fact_ohlcv"]).to_string(), "public.fact_ohlcv");
        assert_eq!(TableName::new(["fact_ohlcv"]).as_single(), Some("fact_ohlcv"));
    }
}
