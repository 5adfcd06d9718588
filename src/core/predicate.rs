//! Purpose: Query predicates shared by the linear scan and the scalar index.
//! Exports: `Predicate`, `TextMatcher`.
//! Role: One predicate value drives both query paths so their results agree.
//! Invariants: A bound predicate carries values already coerced to the column type.
//! Invariants: Predicates never match null; negation is applied over non-null rows only.
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::{ColumnType, Value};

/// Caller-supplied string matcher backing `like` predicates.
pub trait TextMatcher: Send + Sync {
    fn matches(&self, text: &str) -> bool;
}

impl<F> TextMatcher for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, text: &str) -> bool {
        self(text)
    }
}

#[derive(Clone)]
pub enum Predicate {
    Eq(Value),
    Gt(Value),
    Ge(Value),
    Lt(Value),
    Le(Value),
    /// Inclusive on both ends; bound order does not matter.
    Between(Value, Value),
    In(Vec<Value>),
    Like(Arc<dyn TextMatcher>),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq(v) => write!(f, "Eq({v})"),
            Predicate::Gt(v) => write!(f, "Gt({v})"),
            Predicate::Ge(v) => write!(f, "Ge({v})"),
            Predicate::Lt(v) => write!(f, "Lt({v})"),
            Predicate::Le(v) => write!(f, "Le({v})"),
            Predicate::Between(a, b) => write!(f, "Between({a}, {b})"),
            Predicate::In(values) => f.debug_tuple("In").field(values).finish(),
            Predicate::Like(_) => f.write_str("Like(..)"),
        }
    }
}

impl Predicate {
    pub fn like(matcher: impl TextMatcher + 'static) -> Self {
        Predicate::Like(Arc::new(matcher))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Predicate::Eq(_) => "eq",
            Predicate::Gt(_) => "gt",
            Predicate::Ge(_) => "ge",
            Predicate::Lt(_) => "lt",
            Predicate::Le(_) => "le",
            Predicate::Between(..) => "between",
            Predicate::In(_) => "in",
            Predicate::Like(_) => "like",
        }
    }

    /// Coerce every operand to `ty`, rejecting nulls and mismatched operands.
    pub fn bind(&self, ty: ColumnType) -> Result<Predicate, Error> {
        let coerce = |value: &Value| -> Result<Value, Error> {
            if value.is_null() {
                return Err(Error::new(ErrorKind::Argument)
                    .with_message(format!("null operand in `{}` predicate", self.name())));
            }
            value.coerce_to(ty)
        };
        Ok(match self {
            Predicate::Eq(v) => Predicate::Eq(coerce(v)?),
            Predicate::Gt(v) => Predicate::Gt(coerce(v)?),
            Predicate::Ge(v) => Predicate::Ge(coerce(v)?),
            Predicate::Lt(v) => Predicate::Lt(coerce(v)?),
            Predicate::Le(v) => Predicate::Le(coerce(v)?),
            Predicate::Between(a, b) => {
                let (a, b) = (coerce(a)?, coerce(b)?);
                if a <= b { Predicate::Between(a, b) } else { Predicate::Between(b, a) }
            }
            Predicate::In(values) => {
                Predicate::In(values.iter().map(coerce).collect::<Result<Vec<_>, _>>()?)
            }
            Predicate::Like(matcher) => {
                if ty != ColumnType::String {
                    return Err(Error::new(ErrorKind::Argument)
                        .with_message(format!("`like` needs a string column, got {ty}")));
                }
                Predicate::Like(matcher.clone())
            }
        })
    }

    /// Test a non-null cell. Operands must already be bound to the cell's type.
    pub fn matches(&self, cell: &Value) -> bool {
        if cell.is_null() {
            return false;
        }
        match self {
            Predicate::Eq(v) => cell.cmp(v) == Ordering::Equal,
            Predicate::Gt(v) => cell > v,
            Predicate::Ge(v) => cell >= v,
            Predicate::Lt(v) => cell < v,
            Predicate::Le(v) => cell <= v,
            Predicate::Between(lo, hi) => cell >= lo && cell <= hi,
            Predicate::In(values) => values.iter().any(|v| v == cell),
            Predicate::Like(matcher) => cell.as_str().is_some_and(|text| matcher.matches(text)),
        }
    }
}
