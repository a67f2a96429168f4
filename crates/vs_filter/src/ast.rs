use std::fmt;

use crate::token::BinaryOp;

/// Storage unit attached to a quantity literal. MB is the baseline; the
/// store keeps all sizes in MB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityUnit {
    None,
    Kb,
    Mb,
    Gb,
    Tb,
}

impl QuantityUnit {
    /// Split a quantity token like `8GB` into the numeric part and unit.
    pub(crate) fn split(text: &str) -> (&str, QuantityUnit) {
        if text.len() >= 3 {
            let (num, suffix) = text.split_at(text.len() - 2);
            let unit = match suffix.to_ascii_lowercase().as_str() {
                "kb" => Some(QuantityUnit::Kb),
                "mb" => Some(QuantityUnit::Mb),
                "gb" => Some(QuantityUnit::Gb),
                "tb" => Some(QuantityUnit::Tb),
                _ => None,
            };
            if let Some(unit) = unit {
                return (num, unit);
            }
        }
        (text, QuantityUnit::None)
    }
}

impl fmt::Display for QuantityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuantityUnit::None => "",
            QuantityUnit::Kb => "Kb",
            QuantityUnit::Mb => "Mb",
            QuantityUnit::Gb => "Gb",
            QuantityUnit::Tb => "Tb",
        };
        f.write_str(name)
    }
}

/// Abstract syntax tree for a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `a = b`, `a and b`, `name ~ /re/`, ...
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Identifier such as `memory` or `vm.host.datacenter`.
    Var(String),
    StringLit(String),
    BoolLit(bool),
    /// Pattern between slashes, validated at parse time.
    RegexLit(String),
    Quantity { value: f64, unit: QuantityUnit },
    /// Bare string list; only meaningful as the right side of `in`.
    List(Vec<String>),
    /// `field in ['a', 'b']` / `field not in [...]`.
    In {
        field: String,
        values: Vec<String>,
        negated: bool,
    },
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Expression::Var(name) => f.write_str(name),
            Expression::StringLit(s) => write!(f, "{s:?}"),
            Expression::BoolLit(b) => write!(f, "{b}"),
            Expression::RegexLit(p) => write!(f, "/{p}/"),
            Expression::Quantity { value, unit } => write!(f, "{value:.2}{unit}"),
            Expression::List(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                f.write_str("]")
            }
            Expression::In {
                field,
                values,
                negated,
            } => {
                let op = if *negated { "NOT IN" } else { "IN" };
                write!(f, "({field} {op} [")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                f.write_str("])")
            }
        }
    }
}
