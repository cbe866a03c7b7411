//! Tagged runtime values and the conversion rules applied at every operator site.
//!
//! Conventions:
//! - Numeric literals are parsed as `Real`; coercion into a declared type happens on assignment.
//! - `Duration` counts whole milliseconds (IEC `TIME`).
//! - Every operator either yields a value or an `EvalError`, never a silent null.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ast::{ArithOp, CompareOp, DataType};
use super::interpreter::EvalError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
    /// milliseconds
    Duration(i64),
}

impl Value {
    pub fn default_for(data_type: DataType) -> Self {
        match data_type {
            DataType::Bool => Value::Bool(false),
            DataType::Int => Value::Int(0),
            DataType::Real => Value::Real(0.0),
            DataType::Time => Value::Duration(0),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "BOOL",
            Value::Int(_) => "INT",
            Value::Real(_) => "REAL",
            Value::Duration(_) => "TIME",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric view; `Duration` reads as its millisecond count.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(_) => None,
            Value::Int(value) => Some(*value as f64),
            Value::Real(value) => Some(*value),
            Value::Duration(ms) => Some(*ms as f64),
        }
    }

    /// Coerces into a declared type. Used for initial values and assignments to declared names.
    pub fn coerce_to(self, data_type: DataType) -> Result<Value, EvalError> {
        match (data_type, self) {
            (DataType::Bool, Value::Bool(value)) => Ok(Value::Bool(value)),
            (DataType::Bool, other) => Err(EvalError::TypeMismatch {
                op: ":=".to_string(),
                left: "BOOL".to_string(),
                right: other.type_name().to_string(),
            }),
            (DataType::Int, Value::Int(value)) => Ok(Value::Int(value)),
            (DataType::Int, Value::Real(value)) => Ok(Value::Int(value.trunc() as i64)),
            (DataType::Int, Value::Duration(ms)) => Ok(Value::Int(ms)),
            (DataType::Real, Value::Real(value)) => Ok(Value::Real(value)),
            (DataType::Real, Value::Int(value)) => Ok(Value::Real(value as f64)),
            (DataType::Real, Value::Duration(ms)) => Ok(Value::Real(ms as f64)),
            (DataType::Time, Value::Duration(ms)) => Ok(Value::Duration(ms)),
            (DataType::Time, Value::Int(value)) => Ok(Value::Duration(value)),
            (DataType::Time, Value::Real(value)) => Ok(Value::Duration(value.trunc() as i64)),
            (declared, Value::Bool(_)) => Err(EvalError::TypeMismatch {
                op: ":=".to_string(),
                left: declared.keyword().to_string(),
                right: "BOOL".to_string(),
            }),
        }
    }

    pub fn arith(&self, op: ArithOp, right: &Value) -> Result<Value, EvalError> {
        let mismatch = || EvalError::TypeMismatch {
            op: op.symbol().to_string(),
            left: self.type_name().to_string(),
            right: right.type_name().to_string(),
        };

        match (self, right) {
            (Value::Bool(_), _) | (_, Value::Bool(_)) => Err(mismatch()),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_arith(op, *a, *b))),
            (Value::Duration(a), Value::Duration(b)) => match op {
                ArithOp::Add => Ok(Value::Duration(a.wrapping_add(*b))),
                ArithOp::Sub => Ok(Value::Duration(a.wrapping_sub(*b))),
                // TIME * TIME has no unit; degrade to a plain number.
                ArithOp::Mul | ArithOp::Div => Ok(Value::Real(real_arith(op, *a as f64, *b as f64))),
            },
            (Value::Duration(ms), number) if matches!(op, ArithOp::Mul | ArithOp::Div) => {
                let factor = number.as_f64().ok_or_else(mismatch)?;
                Ok(Value::Duration(real_arith(op, *ms as f64, factor).trunc() as i64))
            }
            (number, Value::Duration(ms)) if op == ArithOp::Mul => {
                let factor = number.as_f64().ok_or_else(mismatch)?;
                Ok(Value::Duration((factor * *ms as f64).trunc() as i64))
            }
            (left, right) => {
                let a = left.as_f64().ok_or_else(mismatch)?;
                let b = right.as_f64().ok_or_else(mismatch)?;
                Ok(Value::Real(real_arith(op, a, b)))
            }
        }
    }

    pub fn compare(&self, op: CompareOp, right: &Value) -> Result<bool, EvalError> {
        let ordering = match (self, right) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                return Err(EvalError::TypeMismatch {
                    op: op.symbol().to_string(),
                    left: self.type_name().to_string(),
                    right: right.type_name().to_string(),
                });
            }
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (left, right) => match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        };

        // NaN compares unequal to everything.
        let Some(ordering) = ordering else {
            return Ok(matches!(op, CompareOp::Ne));
        };

        Ok(match op {
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
        })
    }

    pub fn negate(&self) -> Result<Value, EvalError> {
        match self {
            Value::Int(value) => Ok(Value::Int(value.wrapping_neg())),
            Value::Real(value) => Ok(Value::Real(-value)),
            Value::Duration(ms) => Ok(Value::Duration(ms.wrapping_neg())),
            Value::Bool(_) => Err(EvalError::TypeMismatch {
                op: "-".to_string(),
                left: "BOOL".to_string(),
                right: "".to_string(),
            }),
        }
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> i64 {
    match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Div => {
            if b == 0 {
                0
            } else {
                a.wrapping_div(b)
            }
        }
    }
}

fn real_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => {
            if b == 0.0 {
                0.0
            } else {
                a / b
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => write!(f, "TRUE"),
            Value::Bool(false) => write!(f, "FALSE"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Real(value) => write!(f, "{value}"),
            Value::Duration(ms) => write!(f, "T#{ms}ms"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_by_zero_yields_zero_for_every_numeric_kind() {
        for left in [Value::Int(7), Value::Real(-3.5), Value::Real(0.0)] {
            for zero in [Value::Int(0), Value::Real(0.0)] {
                let got = left.arith(ArithOp::Div, &zero).unwrap();
                assert_eq!(got.as_f64(), Some(0.0), "{left:?} / {zero:?}");
            }
        }
        assert_eq!(
            Value::Duration(500).arith(ArithOp::Div, &Value::Int(0)).unwrap(),
            Value::Duration(0)
        );
    }

    #[test]
    fn duration_plus_minus_duration_stays_a_duration() {
        assert_eq!(
            Value::Duration(1_500).arith(ArithOp::Add, &Value::Duration(250)).unwrap(),
            Value::Duration(1_750)
        );
        assert_eq!(
            Value::Duration(250).arith(ArithOp::Sub, &Value::Duration(1_000)).unwrap(),
            Value::Duration(-750)
        );
    }

    #[test]
    fn duration_scaled_by_a_number_stays_a_duration() {
        assert_eq!(
            Value::Duration(400).arith(ArithOp::Mul, &Value::Int(3)).unwrap(),
            Value::Duration(1_200)
        );
        assert_eq!(
            Value::Duration(1_000).arith(ArithOp::Mul, &Value::Real(0.25)).unwrap(),
            Value::Duration(250)
        );
        assert_eq!(
            Value::Real(2.0).arith(ArithOp::Mul, &Value::Duration(150)).unwrap(),
            Value::Duration(300)
        );
        // quotient truncates toward zero
        assert_eq!(
            Value::Duration(1_000).arith(ArithOp::Div, &Value::Int(3)).unwrap(),
            Value::Duration(333)
        );
        assert_eq!(
            Value::Duration(1_000).arith(ArithOp::Div, &Value::Real(0.5)).unwrap(),
            Value::Duration(2_000)
        );
    }

    #[test]
    fn duration_by_duration_degrades_to_a_plain_number() {
        assert_eq!(
            Value::Duration(3_000).arith(ArithOp::Div, &Value::Duration(1_000)).unwrap(),
            Value::Real(3.0)
        );
        assert_eq!(
            Value::Duration(20).arith(ArithOp::Mul, &Value::Duration(5)).unwrap(),
            Value::Real(100.0)
        );
        assert_eq!(
            Value::Duration(20).arith(ArithOp::Div, &Value::Duration(0)).unwrap(),
            Value::Real(0.0)
        );
    }

    #[test]
    fn duration_mixed_with_bool_or_added_to_a_number() {
        assert!(matches!(
            Value::Duration(10).arith(ArithOp::Add, &Value::Bool(true)),
            Err(EvalError::TypeMismatch { .. })
        ));
        // a number added to a TIME has no unit either: plain number
        assert_eq!(
            Value::Duration(10).arith(ArithOp::Add, &Value::Int(5)).unwrap(),
            Value::Real(15.0)
        );
        assert!(Value::Duration(1_000)
            .compare(CompareOp::Gt, &Value::Duration(999))
            .unwrap());
    }

    #[test]
    fn int_and_real_mix_promotes_to_real() {
        assert_eq!(
            Value::Int(2).arith(ArithOp::Add, &Value::Real(0.5)).unwrap(),
            Value::Real(2.5)
        );
        assert_eq!(
            Value::Int(7).arith(ArithOp::Div, &Value::Int(2)).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn bool_operands_are_rejected_by_arithmetic_and_mixed_compare() {
        assert!(matches!(
            Value::Bool(true).arith(ArithOp::Add, &Value::Int(1)),
            Err(EvalError::TypeMismatch { .. })
        ));
        assert!(matches!(
            Value::Bool(true).compare(CompareOp::Eq, &Value::Real(1.0)),
            Err(EvalError::TypeMismatch { .. })
        ));
        assert!(Value::Bool(true)
            .compare(CompareOp::Gt, &Value::Bool(false))
            .unwrap());
    }

    #[test]
    fn coerce_follows_declared_type() {
        assert_eq!(Value::Real(59.9).coerce_to(DataType::Int).unwrap(), Value::Int(59));
        assert_eq!(Value::Real(-1.7).coerce_to(DataType::Int).unwrap(), Value::Int(-1));
        assert_eq!(Value::Int(3).coerce_to(DataType::Real).unwrap(), Value::Real(3.0));
        assert_eq!(Value::Real(250.0).coerce_to(DataType::Time).unwrap(), Value::Duration(250));
        assert!(Value::Real(1.0).coerce_to(DataType::Bool).is_err());
        assert!(Value::Bool(true).coerce_to(DataType::Int).is_err());
    }

    #[test]
    fn nan_is_only_unequal() {
        let nan = Value::Real(f64::NAN);
        assert!(!nan.compare(CompareOp::Eq, &nan).unwrap());
        assert!(nan.compare(CompareOp::Ne, &Value::Int(1)).unwrap());
        assert!(!nan.compare(CompareOp::Lt, &Value::Int(1)).unwrap());
    }
}
