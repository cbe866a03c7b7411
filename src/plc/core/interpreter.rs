//! Tree-walking interpreter: expression evaluator + statement executor.
//!
//! Per cycle:
//! - snapshot `SystemEnable` from the inputs
//! - run the program top-to-bottom, or the default controller when no program is loaded
//! - the first evaluation error aborts the remaining statements, raises `AlarmActive` and is
//!   reported in the outcome; it never escapes `execute_cycle`

use log::{debug, error, warn};
use thiserror::Error;

use super::ast::{ElsifClause, Expr, LogicOp, Program, Statement, UnaryOp, VarClass};
use super::builtins::BuiltinRegistry;
use super::default_controller;
use super::memory::{Memory, MemoryError};
use super::value::Value;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("type mismatch for '{op}': {left} vs {right}")]
    TypeMismatch {
        op: String,
        left: String,
        right: String,
    },

    #[error("condition must be BOOL, got {found}")]
    ConditionNotBool { found: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("function '{name}' produced no value")]
    NoValue { name: String },

    #[error("assignment to '{target}' rejected: {reason}")]
    AssignRejected { target: String, reason: String },
}

impl EvalError {
    fn assign(target: &str, err: MemoryError) -> Self {
        EvalError::AssignRejected {
            target: target.to_string(),
            reason: err.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleOutcome {
    pub system_enabled: bool,
    /// Top-level statements that completed this cycle.
    pub executed: usize,
    pub fault: Option<EvalError>,
}

#[derive(Clone)]
pub struct Interpreter {
    program: Option<Program>,
    builtins: BuiltinRegistry,
    system_enabled: bool,
}

impl Interpreter {
    pub fn new(program: Option<Program>) -> Self {
        Self {
            program,
            builtins: BuiltinRegistry::standard(),
            system_enabled: false,
        }
    }

    pub fn with_builtins(mut self, builtins: BuiltinRegistry) -> Self {
        self.builtins = builtins;
        self
    }

    pub fn is_program_loaded(&self) -> bool {
        self.program.is_some()
    }

    /// Value of `SystemEnable` at the start of the last cycle.
    pub fn system_enabled(&self) -> bool {
        self.system_enabled
    }

    /// Memory for this interpreter: declared variables, or the HVAC defaults without a program.
    pub fn initial_memory(&self) -> Result<Memory, MemoryError> {
        match &self.program {
            Some(program) => Memory::from_program(program),
            None => Ok(Memory::hvac_defaults()),
        }
    }

    pub fn execute_cycle(&mut self, memory: &mut Memory) -> CycleOutcome {
        self.system_enabled = memory.system_enabled();
        let mut outcome = CycleOutcome {
            system_enabled: self.system_enabled,
            ..CycleOutcome::default()
        };

        let result = match &self.program {
            Some(program) => {
                let mut result = Ok(());
                for statement in &program.statements {
                    if let Err(err) = self.execute(statement, memory) {
                        result = Err(err);
                        break;
                    }
                    outcome.executed += 1;
                }
                result
            }
            None => default_controller::run(memory, self.system_enabled),
        };

        if let Err(err) = result {
            warn!(
                "[plc][interp] cycle aborted after {} statement(s): {err}",
                outcome.executed
            );
            if let Err(alarm_err) = memory.raise_alarm() {
                error!("[plc][interp] cannot raise alarm: {alarm_err}");
            }
            outcome.fault = Some(err);
        }
        outcome
    }

    fn execute_block(&self, block: &[Statement], memory: &mut Memory) -> Result<(), EvalError> {
        for statement in block {
            self.execute(statement, memory)?;
        }
        Ok(())
    }

    pub fn execute(&self, statement: &Statement, memory: &mut Memory) -> Result<(), EvalError> {
        match statement {
            Statement::Assignment { target, value } => {
                let value = self.evaluate(value, memory)?;
                self.assign(target, value, memory)
            }
            Statement::If {
                condition,
                then_block,
                elsif_clauses,
                else_block,
            } => self.execute_if(condition, then_block, elsif_clauses, else_block.as_deref(), memory),
            Statement::Call { name, args } => {
                let args = self.evaluate_args(args, memory)?;
                self.builtins.call_statement(name, &args)
            }
        }
    }

    fn assign(&self, target: &str, value: Value, memory: &mut Memory) -> Result<(), EvalError> {
        match memory.class_of(target) {
            Some(VarClass::Output) => memory
                .write_output(target, value)
                .map_err(|err| EvalError::assign(target, err)),
            Some(VarClass::Input) => {
                // Inputs are driven by the bridge only.
                warn!("[plc][interp] cannot assign to input variable: {target}");
                Ok(())
            }
            Some(VarClass::Internal) | None => memory
                .write_internal(target, value)
                .map_err(|err| EvalError::assign(target, err)),
        }
    }

    fn execute_if(
        &self,
        condition: &Expr,
        then_block: &[Statement],
        elsif_clauses: &[ElsifClause],
        else_block: Option<&[Statement]>,
        memory: &mut Memory,
    ) -> Result<(), EvalError> {
        if self.condition(condition, memory)? {
            return self.execute_block(then_block, memory);
        }

        for clause in elsif_clauses {
            if self.condition(&clause.condition, memory)? {
                return self.execute_block(&clause.block, memory);
            }
        }

        match else_block {
            Some(block) => self.execute_block(block, memory),
            None => Ok(()),
        }
    }

    fn condition(&self, expr: &Expr, memory: &Memory) -> Result<bool, EvalError> {
        let value = self.evaluate(expr, memory)?;
        value.as_bool().ok_or_else(|| EvalError::ConditionNotBool {
            found: value.type_name().to_string(),
        })
    }

    fn evaluate_args(&self, args: &[Expr], memory: &Memory) -> Result<Vec<Value>, EvalError> {
        args.iter().map(|arg| self.evaluate(arg, memory)).collect()
    }

    pub fn evaluate(&self, expr: &Expr, memory: &Memory) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Variable { name } => {
                memory
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EvalError::UnknownVariable { name: name.clone() })
            }
            Expr::Arithmetic { op, left, right } => {
                let left = self.evaluate(left, memory)?;
                let right = self.evaluate(right, memory)?;
                left.arith(*op, &right)
            }
            Expr::Comparison { op, left, right } => {
                let left = self.evaluate(left, memory)?;
                let right = self.evaluate(right, memory)?;
                left.compare(*op, &right).map(Value::Bool)
            }
            Expr::Logical { op, left, right } => {
                // Both sides are always evaluated.
                let left = self.evaluate(left, memory)?;
                let right = self.evaluate(right, memory)?;
                let (Some(a), Some(b)) = (left.as_bool(), right.as_bool()) else {
                    return Err(EvalError::TypeMismatch {
                        op: match op {
                            LogicOp::And => "AND".to_string(),
                            LogicOp::Or => "OR".to_string(),
                        },
                        left: left.type_name().to_string(),
                        right: right.type_name().to_string(),
                    });
                };
                Ok(Value::Bool(match op {
                    LogicOp::And => a && b,
                    LogicOp::Or => a || b,
                }))
            }
            Expr::Unary { op, operand } => {
                let operand = self.evaluate(operand, memory)?;
                match op {
                    UnaryOp::Not => operand
                        .as_bool()
                        .map(|b| Value::Bool(!b))
                        .ok_or_else(|| EvalError::TypeMismatch {
                            op: "NOT".to_string(),
                            left: operand.type_name().to_string(),
                            right: "".to_string(),
                        }),
                    UnaryOp::Neg => operand.negate(),
                }
            }
            Expr::Call { name, args } => {
                let args = self.evaluate_args(args, memory)?;
                debug!("[plc][interp] call {name} args={args:?}");
                self.builtins.call_expr(name, &args)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::core::memory::ALARM_ACTIVE;
    use crate::plc::core::parser::parse;

    fn load(source: &str) -> (Interpreter, Memory) {
        let program = parse(source).unwrap();
        let interpreter = Interpreter::new(Some(program));
        let memory = interpreter.initial_memory().unwrap();
        (interpreter, memory)
    }

    fn output(memory: &Memory, name: &str) -> Option<Value> {
        memory.get_in(VarClass::Output, name).cloned()
    }

    #[test]
    fn division_by_zero_evaluates_to_zero() {
        let (mut interp, mut memory) = load(
            "PROGRAM p
             VAR_OUTPUT q : REAL := 9; r : INT := 9; END_VAR
             VAR z : REAL; END_VAR
             q := 17.25 / z;
             r := -4 / 0;
             END_PROGRAM",
        );
        let outcome = interp.execute_cycle(&mut memory);
        assert_eq!(outcome.fault, None);
        assert_eq!(output(&memory, "q"), Some(Value::Real(0.0)));
        assert_eq!(output(&memory, "r"), Some(Value::Int(0)));
    }

    #[test]
    fn assignment_to_input_never_changes_inputs() {
        let (mut interp, mut memory) = load(
            "PROGRAM p
             VAR_INPUT sp : REAL := 22; END_VAR
             VAR_OUTPUT o : REAL; END_VAR
             sp := sp + 1;
             o := sp;
             END_PROGRAM",
        );
        let before = memory.inputs().clone();
        for _ in 0..5 {
            let outcome = interp.execute_cycle(&mut memory);
            assert_eq!(outcome.fault, None);
            assert_eq!(outcome.executed, 2);
        }
        assert_eq!(memory.inputs(), &before);
        assert_eq!(output(&memory, "o"), Some(Value::Real(22.0)));
    }

    #[test]
    fn only_first_true_elsif_runs() {
        let (mut interp, mut memory) = load(
            "PROGRAM p
             VAR_OUTPUT branch : INT; hits : INT; END_VAR
             VAR x : REAL := 5; END_VAR
             IF x > 10 THEN
                 branch := 1;
             ELSIF x > 3 THEN
                 branch := 2;
                 hits := hits + 1;
             ELSIF x > 1 THEN
                 branch := 3;
                 hits := hits + 100;
             ELSE
                 branch := 4;
             END_IF;
             END_PROGRAM",
        );
        interp.execute_cycle(&mut memory);
        assert_eq!(output(&memory, "branch"), Some(Value::Int(2)));
        assert_eq!(output(&memory, "hits"), Some(Value::Int(1)));
    }

    #[test]
    fn else_runs_when_nothing_matches_and_then_stops_the_chain() {
        let source = "PROGRAM p
             VAR_INPUT x : REAL; END_VAR
             VAR_OUTPUT branch : INT; END_VAR
             IF x > 10 THEN branch := 1;
             ELSIF x > 5 THEN branch := 2;
             ELSE branch := 3;
             END_IF;
             END_PROGRAM";
        let (mut interp, mut memory) = load(source);
        interp.execute_cycle(&mut memory);
        assert_eq!(output(&memory, "branch"), Some(Value::Int(3)));

        memory.write_input("x", Value::Real(50.0)).unwrap();
        interp.execute_cycle(&mut memory);
        assert_eq!(output(&memory, "branch"), Some(Value::Int(1)));
    }

    #[test]
    fn undeclared_targets_become_internal() {
        let (mut interp, mut memory) = load(
            "PROGRAM p
             VAR_OUTPUT o : REAL; END_VAR
             scratch := 2 * 3;
             o := scratch + 1;
             END_PROGRAM",
        );
        let outcome = interp.execute_cycle(&mut memory);
        assert_eq!(outcome.fault, None);
        assert_eq!(
            memory.get_in(VarClass::Internal, "scratch"),
            Some(&Value::Real(6.0))
        );
        assert_eq!(output(&memory, "o"), Some(Value::Real(7.0)));
    }

    #[test]
    fn unknown_variable_aborts_cycle_and_raises_alarm() {
        let (mut interp, mut memory) = load(
            "PROGRAM p
             VAR_OUTPUT AlarmActive : BOOL; a : INT; b : INT; END_VAR
             a := 1;
             b := ghost + 1;
             a := 2;
             END_PROGRAM",
        );
        let outcome = interp.execute_cycle(&mut memory);
        assert_eq!(outcome.executed, 1);
        assert_eq!(
            outcome.fault,
            Some(EvalError::UnknownVariable {
                name: "ghost".to_string()
            })
        );
        assert_eq!(output(&memory, "a"), Some(Value::Int(1)));
        assert_eq!(output(&memory, "b"), Some(Value::Int(0)));
        assert_eq!(output(&memory, ALARM_ACTIVE), Some(Value::Bool(true)));

        // next cycle starts over from the first statement
        memory.write_output("a", Value::Int(0)).unwrap();
        interp.execute_cycle(&mut memory);
        assert_eq!(output(&memory, "a"), Some(Value::Int(1)));
    }

    #[test]
    fn logical_operators_evaluate_both_sides() {
        // FALSE AND <error> still reports the error: no short-circuit.
        let (mut interp, mut memory) = load(
            "PROGRAM p
             VAR_OUTPUT o : BOOL; END_VAR
             o := FALSE AND missing;
             END_PROGRAM",
        );
        let outcome = interp.execute_cycle(&mut memory);
        assert!(matches!(outcome.fault, Some(EvalError::UnknownVariable { .. })));
        assert_eq!(output(&memory, ALARM_ACTIVE), Some(Value::Bool(true)));
    }

    #[test]
    fn type_errors_are_reported_not_panicked() {
        let (mut interp, mut memory) = load(
            "PROGRAM p
             VAR_OUTPUT o : REAL; END_VAR
             VAR flag : BOOL := TRUE; END_VAR
             IF o THEN o := 1; END_IF;
             END_PROGRAM",
        );
        let outcome = interp.execute_cycle(&mut memory);
        assert_eq!(
            outcome.fault,
            Some(EvalError::ConditionNotBool {
                found: "REAL".to_string()
            })
        );

        let (mut interp, mut memory) = load(
            "PROGRAM p
             VAR_OUTPUT o : REAL; END_VAR
             o := TRUE + 1;
             END_PROGRAM",
        );
        assert!(matches!(
            interp.execute_cycle(&mut memory).fault,
            Some(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn declared_int_outputs_truncate_real_results() {
        let (mut interp, mut memory) = load(
            "PROGRAM p
             VAR_OUTPUT FanSpeed : INT; END_VAR
             VAR e : REAL := 2.99; END_VAR
             FanSpeed := LIMIT(30, e * 20, 100);
             END_PROGRAM",
        );
        interp.execute_cycle(&mut memory);
        assert_eq!(output(&memory, "FanSpeed"), Some(Value::Int(59)));
    }

    #[test]
    fn time_outputs_hold_duration_expressions() {
        let (mut interp, mut memory) = load(
            "PROGRAM p
             VAR_OUTPUT Delay : TIME; Ratio : REAL; END_VAR
             VAR base : TIME := T#1s; END_VAR
             Delay := base + T#500ms * 2 - T#250ms;
             Ratio := Delay / T#250ms;
             END_PROGRAM",
        );
        let outcome = interp.execute_cycle(&mut memory);
        assert!(outcome.fault.is_none(), "{outcome:?}");
        assert_eq!(output(&memory, "Delay"), Some(Value::Duration(1750)));
        assert_eq!(output(&memory, "Ratio"), Some(Value::Real(7.0)));
    }

    #[test]
    fn system_enable_is_snapshotted_each_cycle() {
        let (mut interp, mut memory) = load(
            "PROGRAM p
             VAR_INPUT SystemEnable : BOOL; END_VAR
             VAR_OUTPUT o : BOOL; END_VAR
             o := SystemEnable;
             END_PROGRAM",
        );
        assert!(!interp.execute_cycle(&mut memory).system_enabled);
        memory.write_input("SystemEnable", Value::Bool(true)).unwrap();
        assert!(interp.execute_cycle(&mut memory).system_enabled);
        assert!(interp.system_enabled());
    }
}
