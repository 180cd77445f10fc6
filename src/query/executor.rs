//! Query execution engine
//!
//! Evaluates a [`QueryPlan`] against a [`Table`] with SQL three-valued
//! logic: a predicate evaluates to true, false or unknown (`Cell::Null`), and
//! only rows where it is true match. Type mismatches are errors, never
//! coercions.

use std::cmp::Ordering;

use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value};

use super::table::{Cell, Table};
use super::{OrderDirection, QueryPlan};
use crate::{Error, Result};

/// Query executor for parsed filter expressions
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryExecutor;

impl QueryExecutor {
    /// Create a new query executor
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Execute a query plan against a table
    ///
    /// Returns the indices of matching rows in result order.
    ///
    /// # Errors
    /// Returns `Error::Query` if:
    /// - the filter compares values of incompatible types
    /// - the filter is not a predicate
    /// - an ORDER BY key mixes types across rows
    /// - the expression uses an unsupported construct
    pub fn execute(&self, plan: &QueryPlan, table: &Table) -> Result<Vec<usize>> {
        let mut matches = Vec::new();
        for row in 0..table.len() {
            let keep = match &plan.filter {
                None => true,
                Some(filter) => match eval(filter, table, row)? {
                    Cell::Bool(b) => b,
                    Cell::Null => false,
                    other => {
                        return Err(Error::Query(format!(
                            "WHERE expression must be a predicate, got {} value {other}",
                            other.type_name()
                        )))
                    }
                },
            };
            if keep {
                matches.push(row);
            }
        }

        if !plan.order_by.is_empty() {
            matches = Self::apply_order_by(plan, table, matches)?;
        }

        if let Some(limit) = plan.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    fn apply_order_by(plan: &QueryPlan, table: &Table, rows: Vec<usize>) -> Result<Vec<usize>> {
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let keys = plan
                .order_by
                .iter()
                .map(|key| eval(&key.expr, table, row))
                .collect::<Result<Vec<_>>>()?;
            keyed.push((row, keys));
        }

        for (i, key) in plan.order_by.iter().enumerate() {
            let mut seen: Option<&Cell> = None;
            for (_, keys) in &keyed {
                let cell = &keys[i];
                if cell.is_null() {
                    continue;
                }
                match seen {
                    Some(first) if first.compare(cell).is_none() => {
                        return Err(Error::Query(format!(
                            "cannot sort by {}: mixes {} and {} values",
                            key.expr,
                            first.type_name(),
                            cell.type_name()
                        )));
                    }
                    Some(_) => {}
                    None => seen = Some(cell),
                }
            }
        }

        // Stable: rows with equal keys keep table order.
        keyed.sort_by(|(_, a), (_, b)| {
            plan.order_by
                .iter()
                .zip(a.iter().zip(b))
                .map(|(key, (x, y))| match (x.is_null(), y.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) if key.nulls_first => Ordering::Less,
                    (true, false) => Ordering::Greater,
                    (false, true) if key.nulls_first => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => {
                        let natural = x.compare(y).unwrap_or(Ordering::Equal);
                        match key.direction {
                            OrderDirection::Asc => natural,
                            OrderDirection::Desc => natural.reverse(),
                        }
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        Ok(keyed.into_iter().map(|(row, _)| row).collect())
    }
}

fn eval(expr: &Expr, table: &Table, row: usize) -> Result<Cell> {
    match expr {
        Expr::Identifier(ident) => Ok(table.cell(row, &ident.value).clone()),
        Expr::CompoundIdentifier(parts) => {
            let name = parts
                .iter()
                .map(|p| p.value.as_str())
                .collect::<Vec<_>>()
                .join(".");
            Ok(table.cell(row, &name).clone())
        }
        Expr::Value(value) => literal(value),
        Expr::Nested(inner) => eval(inner, table, row),
        Expr::UnaryOp { op, expr } => {
            let value = eval(expr, table, row)?;
            match (op, value) {
                (UnaryOperator::Not, value) => Ok(not(&predicate(value, "NOT")?)),
                (UnaryOperator::Minus, Cell::Int(i)) => i.checked_neg().map(Cell::Int).ok_or_else(|| {
                    Error::Query(format!("-({i}) is out of range for an integer"))
                }),
                (UnaryOperator::Minus, Cell::Float(f)) => Ok(Cell::Float(-f)),
                (UnaryOperator::Plus, v @ (Cell::Int(_) | Cell::Float(_))) => Ok(v),
                (UnaryOperator::Minus | UnaryOperator::Plus, Cell::Null) => Ok(Cell::Null),
                (op, value) => Err(Error::Query(format!(
                    "cannot apply {op} to {} value {value}",
                    value.type_name()
                ))),
            }
        }
        Expr::BinaryOp { left, op, right } => {
            let lhs = eval(left, table, row)?;
            let rhs = eval(right, table, row)?;
            match op {
                BinaryOperator::And => Ok(and(&predicate(lhs, "AND")?, &predicate(rhs, "AND")?)),
                BinaryOperator::Or => Ok(or(&predicate(lhs, "OR")?, &predicate(rhs, "OR")?)),
                BinaryOperator::Eq => compare(&lhs, &rhs, op, Ordering::is_eq),
                BinaryOperator::NotEq => compare(&lhs, &rhs, op, Ordering::is_ne),
                BinaryOperator::Lt => compare(&lhs, &rhs, op, Ordering::is_lt),
                BinaryOperator::LtEq => compare(&lhs, &rhs, op, Ordering::is_le),
                BinaryOperator::Gt => compare(&lhs, &rhs, op, Ordering::is_gt),
                BinaryOperator::GtEq => compare(&lhs, &rhs, op, Ordering::is_ge),
                other => Err(Error::Query(format!("unsupported operator {other}"))),
            }
        }
        Expr::IsNull(inner) => Ok(Cell::Bool(eval(inner, table, row)?.is_null())),
        Expr::IsNotNull(inner) => Ok(Cell::Bool(!eval(inner, table, row)?.is_null())),
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let needle = eval(expr, table, row)?;
            let mut result = Cell::Bool(false);
            for item in list {
                let candidate = eval(item, table, row)?;
                let hit = compare(&needle, &candidate, &BinaryOperator::Eq, Ordering::is_eq)?;
                result = or(&result, &hit);
            }
            Ok(if *negated { not(&result) } else { result })
        }
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let value = eval(expr, table, row)?;
            let low = eval(low, table, row)?;
            let high = eval(high, table, row)?;
            let above = compare(&value, &low, &BinaryOperator::GtEq, Ordering::is_ge)?;
            let below = compare(&value, &high, &BinaryOperator::LtEq, Ordering::is_le)?;
            let result = and(&above, &below);
            Ok(if *negated { not(&result) } else { result })
        }
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => like(eval(expr, table, row)?, eval(pattern, table, row)?, *negated, false),
        Expr::ILike {
            negated,
            expr,
            pattern,
            ..
        } => like(eval(expr, table, row)?, eval(pattern, table, row)?, *negated, true),
        other => Err(Error::Query(format!("unsupported expression: {other}"))),
    }
}

fn literal(value: &Value) -> Result<Cell> {
    match value {
        Value::Null => Ok(Cell::Null),
        Value::Boolean(b) => Ok(Cell::Bool(*b)),
        Value::SingleQuotedString(s) => Ok(Cell::Text(s.clone())),
        Value::Number(n, _) => n
            .parse::<i64>()
            .map(Cell::Int)
            .or_else(|_| n.parse::<f64>().map(Cell::Float))
            .map_err(|_| Error::Query(format!("invalid number literal {n}"))),
        other => Err(Error::Query(format!("unsupported literal {other}"))),
    }
}

fn predicate(cell: Cell, context: &str) -> Result<Cell> {
    match cell {
        Cell::Bool(_) | Cell::Null => Ok(cell),
        other => Err(Error::Query(format!(
            "{context} expects boolean operands, got {} value {other}",
            other.type_name()
        ))),
    }
}

const fn not(cell: &Cell) -> Cell {
    match cell {
        Cell::Bool(b) => Cell::Bool(!*b),
        _ => Cell::Null,
    }
}

const fn and(a: &Cell, b: &Cell) -> Cell {
    match (a, b) {
        (Cell::Bool(false), _) | (_, Cell::Bool(false)) => Cell::Bool(false),
        (Cell::Bool(true), Cell::Bool(true)) => Cell::Bool(true),
        _ => Cell::Null,
    }
}

const fn or(a: &Cell, b: &Cell) -> Cell {
    match (a, b) {
        (Cell::Bool(true), _) | (_, Cell::Bool(true)) => Cell::Bool(true),
        (Cell::Bool(false), Cell::Bool(false)) => Cell::Bool(false),
        _ => Cell::Null,
    }
}

fn compare(
    lhs: &Cell,
    rhs: &Cell,
    op: &BinaryOperator,
    test: impl Fn(Ordering) -> bool,
) -> Result<Cell> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Cell::Null);
    }
    lhs.compare(rhs)
        .map(|ordering| Cell::Bool(test(ordering)))
        .ok_or_else(|| {
            Error::Query(format!(
                "type mismatch: cannot compare {} value {lhs} {op} {} value {rhs}",
                lhs.type_name(),
                rhs.type_name()
            ))
        })
}

fn like(value: Cell, pattern: Cell, negated: bool, case_insensitive: bool) -> Result<Cell> {
    let result = match (&value, &pattern) {
        (Cell::Null, _) | (_, Cell::Null) => Cell::Null,
        (Cell::Text(text), Cell::Text(pattern)) => {
            if case_insensitive {
                Cell::Bool(like_match(&text.to_lowercase(), &pattern.to_lowercase()))
            } else {
                Cell::Bool(like_match(text, pattern))
            }
        }
        _ => {
            return Err(Error::Query(format!(
                "LIKE expects text operands, got {} value {value} and {} value {pattern}",
                value.type_name(),
                pattern.type_name()
            )))
        }
    };
    Ok(if negated { not(&result) } else { result })
}

/// SQL LIKE: `%` matches any run of characters, `_` exactly one.
fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // matched[j]: pattern[..j] matches text[..i] for the current i
    let mut matched = vec![false; pattern.len() + 1];
    matched[0] = true;
    for j in 1..=pattern.len() {
        matched[j] = matched[j - 1] && pattern[j - 1] == '%';
    }

    for &c in &text {
        let mut next = vec![false; pattern.len() + 1];
        for j in 1..=pattern.len() {
            next[j] = match pattern[j - 1] {
                '%' => next[j - 1] || matched[j],
                '_' => matched[j - 1],
                p => matched[j - 1] && p == c,
            };
        }
        matched = next;
    }
    matched[pattern.len()]
}
