//! Register word encoding for memory values.
//!
//! Conventions:
//! - `BOOL` is 0/1.
//! - numbers are multiplied by the signal scale and truncated toward zero.
//! - a word must fit `u16`; anything else is a `CodecError`, never a silent wrap.
//! - callers that must publish anyway use `saturated_word` for the failed value.

use thiserror::Error;

use super::register_map::Signal;
use super::value::Value;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("{signal}: value {value} is not finite")]
    NotFinite { signal: &'static str, value: f64 },

    #[error("{signal}: scaled value {scaled} does not fit a 16-bit register")]
    OutOfRange { signal: &'static str, scaled: f64 },
}

/// Encodes a memory value; a missing value encodes as 0.
pub fn encode(signal: Signal, value: Option<&Value>) -> Result<u16, CodecError> {
    let raw = match value {
        None => return Ok(0),
        Some(Value::Bool(flag)) => return Ok(u16::from(*flag)),
        Some(Value::Int(v)) => *v as f64,
        Some(Value::Real(v)) => *v,
        Some(Value::Duration(ms)) => *ms as f64,
    };
    encode_f64(signal, raw)
}

pub fn encode_f64(signal: Signal, raw: f64) -> Result<u16, CodecError> {
    if !raw.is_finite() {
        return Err(CodecError::NotFinite {
            signal: signal.name(),
            value: raw,
        });
    }
    let scaled = (raw * signal.scale()).trunc();
    if !(0.0..=f64::from(u16::MAX)).contains(&scaled) {
        return Err(CodecError::OutOfRange {
            signal: signal.name(),
            scaled,
        });
    }
    Ok(scaled as u16)
}

/// Nearest representable word for a value `encode` rejected; NaN maps to 0.
pub fn saturated_word(err: &CodecError) -> u16 {
    let bound = match err {
        CodecError::NotFinite { value, .. } => *value,
        CodecError::OutOfRange { scaled, .. } => *scaled,
    };
    if bound > 0.0 {
        u16::MAX
    } else {
        0
    }
}

pub fn decode(signal: Signal, word: u16) -> f64 {
    f64::from(word) / signal.scale()
}

/// Command words as memory values: `SystemEnable` is a flag, the rest are scaled reals.
pub fn decode_value(signal: Signal, word: u16) -> Value {
    match signal {
        Signal::SystemEnable | Signal::ChillerOn | Signal::AlarmActive | Signal::ActuatorChiller => {
            Value::Bool(word != 0)
        }
        _ => Value::Real(decode(signal, word)),
    }
}

/// Fan speed sent to the plant, bounded to 0..=100 percent.
pub fn fan_speed_word(value: Option<&Value>) -> u16 {
    let percent = value.and_then(Value::as_f64).unwrap_or(0.0);
    if percent.is_nan() {
        return 0;
    }
    percent.trunc().clamp(0.0, 100.0) as u16
}
