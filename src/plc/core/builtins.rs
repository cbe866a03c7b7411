//! Named built-in registry behind `FunctionCall`.
//!
//! Names not in the registry fall back to a log-only handler when called as a statement.
//! As an expression they are an error, since there is no value to produce.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use super::ast::CompareOp;
use super::interpreter::EvalError;
use super::value::Value;

pub trait Builtin: Send + Sync {
    /// `Ok(None)` means the call produces no value.
    fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, EvalError>;
}

impl<F> Builtin for F
where
    F: Fn(&str, &[Value]) -> Result<Option<Value>, EvalError> + Send + Sync,
{
    fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
        self(name, args)
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogOnly;

impl Builtin for LogOnly {
    fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
        let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
        debug!("[plc][builtin] call name={name} args=[{}]", rendered.join(", "));
        Ok(None)
    }
}

#[derive(Clone)]
pub struct BuiltinRegistry {
    functions: HashMap<String, Arc<dyn Builtin>>,
    fallback: Arc<dyn Builtin>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl BuiltinRegistry {
    /// Registry without any functions; every statement call is logged only.
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
            fallback: Arc::new(LogOnly),
        }
    }

    /// `ABS`, `MIN`, `MAX`, `LIMIT`.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("ABS", Arc::new(abs));
        registry.register("MIN", Arc::new(min));
        registry.register("MAX", Arc::new(max));
        registry.register("LIMIT", Arc::new(limit));
        registry
    }

    pub fn register(&mut self, name: &str, builtin: Arc<dyn Builtin>) {
        self.functions.insert(name.to_string(), builtin);
    }

    /// Statement position: result discarded, unknown names go to the fallback.
    pub fn call_statement(&self, name: &str, args: &[Value]) -> Result<(), EvalError> {
        match self.functions.get(name) {
            Some(builtin) => builtin.call(name, args).map(|_| ()),
            None => self.fallback.call(name, args).map(|_| ()),
        }
    }

    /// Expression position: a value is required.
    pub fn call_expr(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let builtin = self
            .functions
            .get(name)
            .ok_or_else(|| EvalError::UnknownFunction {
                name: name.to_string(),
            })?;
        builtin
            .call(name, args)?
            .ok_or_else(|| EvalError::NoValue {
                name: name.to_string(),
            })
    }
}

fn require_args<'a>(name: &str, args: &'a [Value], expected: usize) -> Result<&'a [Value], EvalError> {
    if args.len() != expected {
        return Err(EvalError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(args)
}

fn abs(name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
    let args = require_args(name, args, 1)?;
    let value = match &args[0] {
        Value::Int(v) => Value::Int(v.wrapping_abs()),
        Value::Real(v) => Value::Real(v.abs()),
        Value::Duration(ms) => Value::Duration(ms.wrapping_abs()),
        Value::Bool(_) => {
            return Err(EvalError::TypeMismatch {
                op: name.to_string(),
                left: "BOOL".to_string(),
                right: "".to_string(),
            });
        }
    };
    Ok(Some(value))
}

fn pick(a: &Value, b: &Value, take_smaller: bool) -> Result<Value, EvalError> {
    let a_is_smaller = a.compare(CompareOp::Le, b)?;
    Ok(if a_is_smaller == take_smaller {
        a.clone()
    } else {
        b.clone()
    })
}

fn min(name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
    let args = require_args(name, args, 2)?;
    pick(&args[0], &args[1], true).map(Some)
}

fn max(name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
    let args = require_args(name, args, 2)?;
    pick(&args[0], &args[1], false).map(Some)
}

/// IEC `LIMIT(MN, IN, MX)`.
fn limit(name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
    let args = require_args(name, args, 3)?;
    let upper_bounded = pick(&args[1], &args[2], true)?;
    pick(&args[0], &upper_bounded, false).map(Some)
}
