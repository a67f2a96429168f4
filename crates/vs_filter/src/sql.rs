use crate::ast::{Expression, QuantityUnit};
use crate::token::BinaryOp;
use crate::{FieldMap, FilterError};

/// A SQL fragment with positional `?` placeholders and the values bound
/// to them, suitable for a `WHERE` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlExpr {
    pub sql: String,
    pub args: Vec<String>,
}

/// Lower an expression to SQL. User strings and regex patterns become
/// bound arguments; identifiers resolve through the field map; booleans
/// and MB-normalized quantities become literals.
pub fn to_sql(expr: &Expression, map: &dyn FieldMap) -> Result<SqlExpr, FilterError> {
    match expr {
        Expression::Binary { op, left, right } => {
            let left = to_sql(left, map)?;
            let right = to_sql(right, map)?;
            let mut args = left.args;
            args.extend(right.args);
            let sql = match op {
                BinaryOp::Match => format!("regexp_matches({}, {})", left.sql, right.sql),
                BinaryOp::NotMatch => format!("NOT regexp_matches({}, {})", left.sql, right.sql),
                op => format!("({} {} {})", left.sql, op.sql(), right.sql),
            };
            Ok(SqlExpr { sql, args })
        }
        Expression::Var(name) => {
            let column = map.column(&name.to_lowercase())?;
            Ok(SqlExpr {
                sql: column,
                args: Vec::new(),
            })
        }
        Expression::StringLit(value) => Ok(SqlExpr {
            sql: "?".into(),
            args: vec![value.clone()],
        }),
        Expression::BoolLit(value) => Ok(SqlExpr {
            sql: if *value { "TRUE".into() } else { "FALSE".into() },
            args: Vec::new(),
        }),
        Expression::RegexLit(pattern) => Ok(SqlExpr {
            sql: "?".into(),
            args: vec![pattern.clone()],
        }),
        Expression::Quantity { value, unit } => {
            let mb = match unit {
                QuantityUnit::Kb => value / 1024.0,
                QuantityUnit::Mb | QuantityUnit::None => *value,
                QuantityUnit::Gb => value * 1024.0,
                QuantityUnit::Tb => value * 1024.0 * 1024.0,
            };
            Ok(SqlExpr {
                sql: format!("{mb:.2}"),
                args: Vec::new(),
            })
        }
        Expression::In {
            field,
            values,
            negated,
        } => {
            let column = map.column(&field.to_lowercase())?;
            if values.is_empty() {
                // IN () is not valid SQL; match no rows (or all for NOT IN).
                return Ok(SqlExpr {
                    sql: if *negated { "(1=1)".into() } else { "(1=0)".into() },
                    args: Vec::new(),
                });
            }
            let placeholders = vec!["?"; values.len()].join(",");
            let op = if *negated { "NOT IN" } else { "IN" };
            Ok(SqlExpr {
                sql: format!("{column} {op} ({placeholders})"),
                args: values.clone(),
            })
        }
        Expression::List(_) => Err(FilterError::Unsupported("bare list")),
    }
}
