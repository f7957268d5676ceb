/*!
Textual archive: primitives become JSON tokens.

A saved object is a flat JSON array. Finite floats are JSON numbers;
non-finite floats are spelled `"NaN"`, `"inf"` and `"-inf"` because JSON has
no representation for them.
*/

use serde_json::Value;
use std::collections::VecDeque;

use super::{LoadArchive, SaveArchive};
use crate::{PersistError, Result};

/// Textual archive writer collecting JSON tokens
#[derive(Debug, Default)]
pub struct TextSaveArchive {
    tokens: Vec<Value>,
}

impl TextSaveArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_tokens(self) -> Vec<Value> {
        self.tokens
    }

    /// Render the collected tokens as a single-line JSON array
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.tokens)?)
    }
}

impl SaveArchive for TextSaveArchive {
    fn save_u64(&mut self, value: u64) -> Result<()> {
        self.tokens.push(Value::from(value));
        Ok(())
    }

    fn save_i64(&mut self, value: i64) -> Result<()> {
        self.tokens.push(Value::from(value));
        Ok(())
    }

    fn save_f64(&mut self, value: f64) -> Result<()> {
        let token = if value.is_nan() {
            Value::from("NaN")
        } else if value.is_infinite() {
            Value::from(if value > 0.0 { "inf" } else { "-inf" })
        } else {
            Value::from(value)
        };
        self.tokens.push(token);
        Ok(())
    }

    fn save_bool(&mut self, value: bool) -> Result<()> {
        self.tokens.push(Value::Bool(value));
        Ok(())
    }

    fn save_str(&mut self, value: &str) -> Result<()> {
        self.tokens.push(Value::from(value));
        Ok(())
    }
}

/// Textual archive reader consuming JSON tokens front to back
#[derive(Debug)]
pub struct TextLoadArchive {
    tokens: VecDeque<Value>,
}

impl TextLoadArchive {
    pub fn new(tokens: Vec<Value>) -> Self {
        Self {
            tokens: tokens.into(),
        }
    }

    /// Parse a single JSON array line produced by [`TextSaveArchive::to_json_line`]
    pub fn from_json_line(line: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(line)? {
            Value::Array(tokens) => Ok(Self::new(tokens)),
            other => Err(PersistError::format(format!(
                "Expected a JSON array of archive tokens, found {other}"
            ))),
        }
    }

    fn next(&mut self, expected: &str) -> Result<Value> {
        self.tokens.pop_front().ok_or_else(|| {
            PersistError::format(format!("Archive ended while expecting {expected}"))
        })
    }
}

fn mismatch(expected: &str, found: &Value) -> PersistError {
    PersistError::format(format!("Expected {expected} in archive, found {found}"))
}

impl LoadArchive for TextLoadArchive {
    fn load_u64(&mut self) -> Result<u64> {
        let token = self.next("u64")?;
        token.as_u64().ok_or_else(|| mismatch("u64", &token))
    }

    fn load_i64(&mut self) -> Result<i64> {
        let token = self.next("i64")?;
        token.as_i64().ok_or_else(|| mismatch("i64", &token))
    }

    fn load_f64(&mut self) -> Result<f64> {
        let token = self.next("f64")?;
        match &token {
            Value::Number(n) => n.as_f64().ok_or_else(|| mismatch("f64", &token)),
            Value::String(s) if s == "NaN" => Ok(f64::NAN),
            Value::String(s) if s == "inf" => Ok(f64::INFINITY),
            Value::String(s) if s == "-inf" => Ok(f64::NEG_INFINITY),
            _ => Err(mismatch("f64", &token)),
        }
    }

    fn load_bool(&mut self) -> Result<bool> {
        let token = self.next("bool")?;
        token.as_bool().ok_or_else(|| mismatch("bool", &token))
    }

    fn load_string(&mut self) -> Result<String> {
        match self.next("string")? {
            Value::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }

    fn is_exhausted(&self) -> bool {
        self.tokens.is_empty()
    }
}
