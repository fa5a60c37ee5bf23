use std::collections::BTreeMap;

use thiserror::Error;

use super::Value;

/// Shape error raised while reading positional arguments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArgError {
    #[error("missing argument {index} ({name})")]
    Missing { index: usize, name: &'static str },
    #[error("argument {index} ({name}) must be {expected}, got {found}")]
    Type {
        index: usize,
        name: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("parameter {name:?} has no value")]
    DanglingName { name: String },
}

/// Sequential reader over a message's arguments.
#[derive(Debug, Clone)]
pub struct ArgCursor<'a> {
    args: &'a [Value],
    index: usize,
}

impl<'a> ArgCursor<'a> {
    pub fn new(args: &'a [Value]) -> Self {
        Self { args, index: 0 }
    }

    pub fn position(&self) -> usize {
        self.index
    }

    pub fn remaining(&self) -> usize {
        self.args.len().saturating_sub(self.index)
    }

    fn next(&mut self, name: &'static str) -> Result<&'a Value, ArgError> {
        let value = self.args.get(self.index).ok_or(ArgError::Missing {
            index: self.index,
            name,
        })?;
        self.index += 1;
        Ok(value)
    }

    fn mismatch(&self, name: &'static str, expected: &'static str, found: &Value) -> ArgError {
        ArgError::Type {
            index: self.index - 1,
            name,
            expected,
            found: found.type_name(),
        }
    }

    pub fn string(&mut self, name: &'static str) -> Result<&'a str, ArgError> {
        let value = self.next(name)?;
        value
            .as_str()
            .ok_or_else(|| self.mismatch(name, "string", value))
    }

    pub fn int(&mut self, name: &'static str) -> Result<i32, ArgError> {
        let value = self.next(name)?;
        value.as_int().ok_or_else(|| self.mismatch(name, "int", value))
    }

    pub fn float(&mut self, name: &'static str) -> Result<f32, ArgError> {
        let value = self.next(name)?;
        value
            .as_float()
            .ok_or_else(|| self.mismatch(name, "number", value))
    }

    /// Consumes the next argument only when it is an int.
    ///
    /// Optional delays and tone indexes sit in front of the name/value list,
    /// where names are always strings, so an int there is unambiguous.
    pub fn optional_int(&mut self) -> Option<i32> {
        let value = self.args.get(self.index)?.as_int()?;
        self.index += 1;
        Some(value)
    }

    pub fn optional_float(&mut self, name: &'static str) -> Result<Option<f32>, ArgError> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        self.float(name).map(Some)
    }

    /// Reads the trailing `name, value, name, value...` list.
    pub fn named_pairs(&mut self) -> Result<BTreeMap<String, f32>, ArgError> {
        let mut pairs = BTreeMap::new();
        while self.remaining() > 0 {
            let name = self.string("parameter name")?;
            let value = match self.args.get(self.index) {
                Some(value) => value,
                None => {
                    return Err(ArgError::DanglingName {
                        name: name.to_owned(),
                    })
                }
            };
            self.index += 1;
            let value = value
                .as_float()
                .ok_or_else(|| self.mismatch("parameter value", "number", value))?;
            pairs.insert(name.to_owned(), value);
        }
        Ok(pairs)
    }
}
