//! Query parsing and execution
//!
//! Filters experiments with a SQL `WHERE`-clause subset over the flattened
//! metadata and config columns (see [`Table`]).
//!
//! ## Supported SQL Subset
//!
//! - Comparisons: `=`, `!=`, `<>`, `<`, `<=`, `>`, `>=`
//! - Logic: `AND`, `OR`, `NOT`, parentheses (three-valued)
//! - `IS [NOT] NULL`, `[NOT] IN (...)`, `[NOT] BETWEEN`, `[NOT] LIKE`, `ILIKE`
//! - Literals: numbers, `'strings'`, `TRUE`/`FALSE`, `NULL`, unary minus
//! - Trailing `ORDER BY col [ASC|DESC] [NULLS FIRST|LAST], ...` and `LIMIT n`
//!
//! The expression is parsed as `SELECT * FROM experiments WHERE <expr>`, so
//! anything that would not parse there is a syntax error, and any statement
//! shape beyond a single plain `SELECT` is rejected.
//!
//! References:
//! - sqlparser-rs: <https://docs.rs/sqlparser>

mod executor;
mod table;

pub use executor::QueryExecutor;
pub use table::{Cell, Row, Table, METADATA_COLUMNS};

use sqlparser::ast::{Expr, GroupByExpr, OrderByExpr, Query, SelectItem, SetExpr, Statement, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::experiment::Experiment;
use crate::{Error, Result};

/// Parsed filter expression with extracted components
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// WHERE predicate (`None` matches every row)
    pub filter: Option<Expr>,
    /// ORDER BY keys, applied left to right
    pub order_by: Vec<SortKey>,
    /// LIMIT count (optional)
    pub limit: Option<usize>,
}

/// One ORDER BY key
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    /// Expression evaluated per row
    pub expr: Expr,
    /// Sort direction
    pub direction: OrderDirection,
    /// Whether NULLs sort before non-null values
    pub nulls_first: bool,
}

/// Sort order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (smallest first)
    Asc,
    /// Descending order (largest first)
    Desc,
}

/// Query parser
#[derive(Debug)]
pub struct QueryEngine {
    dialect: GenericDialect,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEngine {
    /// Create a new query engine
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dialect: GenericDialect {},
        }
    }

    /// Parse a filter expression into a query plan
    ///
    /// # Errors
    /// Returns `Error::Query` if:
    /// - the expression is not valid SQL
    /// - it smuggles in more than a `WHERE` / `ORDER BY` / `LIMIT` tail
    ///
    /// # Example
    /// ```
    /// use ox_lab::query::QueryEngine;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let engine = QueryEngine::new();
    /// let plan = engine.parse("lr < 0.05 AND status = 'completed' ORDER BY lr DESC LIMIT 3")?;
    /// assert!(plan.filter.is_some());
    /// assert_eq!(plan.limit, Some(3));
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(&self, expression: &str) -> Result<QueryPlan> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Ok(QueryPlan {
                filter: None,
                order_by: Vec::new(),
                limit: None,
            });
        }

        let starts_with_tail = trimmed
            .split_whitespace()
            .next()
            .is_some_and(|word| word.eq_ignore_ascii_case("order") || word.eq_ignore_ascii_case("limit"));
        let sql = if starts_with_tail {
            format!("SELECT * FROM experiments {trimmed}")
        } else {
            format!("SELECT * FROM experiments WHERE {trimmed}")
        };

        let statements = Parser::parse_sql(&self.dialect, &sql)
            .map_err(|e| Error::Query(format!("syntax error: {e}")))?;

        if statements.len() != 1 {
            return Err(Error::Query(
                "only a single expression is supported".to_string(),
            ));
        }

        let Statement::Query(query) = &statements[0] else {
            return Err(Error::Query("unsupported statement".to_string()));
        };

        Self::parse_select_query(query)
    }

    fn parse_select_query(query: &Query) -> Result<QueryPlan> {
        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(Error::Query(
                "set operations and subqueries are not supported".to_string(),
            ));
        };

        if query.with.is_some() || query.offset.is_some() || query.fetch.is_some() {
            return Err(Error::Query(
                "only WHERE, ORDER BY and LIMIT are supported".to_string(),
            ));
        }
        if select.having.is_some()
            || select.distinct.is_some()
            || select.from.len() != 1
            || !select.from[0].joins.is_empty()
            || !matches!(select.projection.as_slice(), [SelectItem::Wildcard(_)])
            || !matches!(&select.group_by, GroupByExpr::Expressions(exprs, _) if exprs.is_empty())
        {
            return Err(Error::Query(
                "only WHERE, ORDER BY and LIMIT are supported".to_string(),
            ));
        }

        let order_by = query
            .order_by
            .as_ref()
            .map(|ob| ob.exprs.iter().map(Self::extract_sort_key).collect())
            .unwrap_or_default();

        let limit = query.limit.as_ref().map(Self::extract_limit).transpose()?;

        Ok(QueryPlan {
            filter: select.selection.clone(),
            order_by,
            limit,
        })
    }

    fn extract_sort_key(order: &OrderByExpr) -> SortKey {
        let direction = if order.asc.unwrap_or(true) {
            OrderDirection::Asc
        } else {
            OrderDirection::Desc
        };
        SortKey {
            expr: order.expr.clone(),
            direction,
            nulls_first: order.nulls_first.unwrap_or(false),
        }
    }

    fn extract_limit(limit: &Expr) -> Result<usize> {
        if let Expr::Value(Value::Number(n, _)) = limit {
            if let Ok(n) = n.parse() {
                return Ok(n);
            }
        }
        Err(Error::Query(format!(
            "LIMIT must be a non-negative integer, got {limit}"
        )))
    }
}

/// Experiments matched by a query, in result order.
#[derive(Debug, Clone)]
pub struct QueryResult {
    table: Table,
    matches: Vec<usize>,
}

impl QueryResult {
    /// Number of matching rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Whether nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Column names of every row.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        self.table.columns()
    }

    /// Matching rows in result order.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        self.matches.iter().map(|&i| self.table.row(i))
    }

    /// Experiment slugs of the matching rows, in result order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.rows()
            .filter_map(|row| match row.get("id") {
                Cell::Text(id) => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Filter and order experiments with a SQL expression.
///
/// # Errors
///
/// Returns `Error::Query` for syntax errors, unsupported constructs and type
/// mismatches; the message lists the available columns.
///
/// # Example
/// ```
/// use ox_lab::experiment::Experiment;
/// use ox_lab::query::query_experiments;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let experiments = vec![
///     Experiment::builder("a", "s").build(),
///     Experiment::builder("b", "s").tags(["keep"]).build(),
/// ];
/// let result = query_experiments(&experiments, "tags LIKE '%keep%'")?;
/// assert_eq!(result.ids(), ["b"]);
/// # Ok(())
/// # }
/// ```
pub fn query_experiments(experiments: &[Experiment], expression: &str) -> Result<QueryResult> {
    let table = Table::from_experiments(experiments);
    let outcome = QueryEngine::new()
        .parse(expression)
        .and_then(|plan| QueryExecutor::new().execute(&plan, &table));

    match outcome {
        Ok(matches) => {
            debug!(expression, rows = table.len(), matched = matches.len(), "query executed");
            Ok(QueryResult { table, matches })
        }
        Err(Error::Query(message)) => Err(Error::Query(format!(
            "{message}\nExpression: {expression}\nAvailable columns: {}",
            table.columns().join(", ")
        ))),
        Err(other) => Err(other),
    }
}
