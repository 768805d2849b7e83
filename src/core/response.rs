//! Purpose: Encode and decode the `code|message` result line returned to hosts.
//! Exports: `Response`, `DELIMITER`, `join_fields`.
//! Role: Sole serialization format crossing the native boundary.
//! Invariants: Code 0 is success; every other code is a stable error class.
//! Invariants: Decoding splits once on the first delimiter; the message keeps any later ones.
use std::fmt;

use super::error::{Error, to_response_code};

pub const DELIMITER: char = '|';

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    code: i32,
    message: String,
}

impl Response {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parses a wire line. A missing or non-numeric code decodes as -1, and a
    /// line without a delimiter decodes with an empty message.
    pub fn decode(raw: &str) -> Self {
        let (code, message) = match raw.split_once(DELIMITER) {
            Some((code, message)) => (code, message),
            None => (raw, ""),
        };
        Self {
            code: code.trim().parse().unwrap_or(-1),
            message: message.to_string(),
        }
    }

    /// Splits a multi-field success payload such as `private|public|hash`.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.message.split(DELIMITER)
    }

    pub fn from_result(result: Result<(), Error>, success_message: &str) -> Self {
        match result {
            Ok(()) => Self::success(success_message),
            Err(err) => Self::from(&err),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.code, DELIMITER, self.message)
    }
}

impl From<&Error> for Response {
    fn from(err: &Error) -> Self {
        Self::new(to_response_code(err.kind()), err.detail())
    }
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

pub fn join_fields(fields: &[&str]) -> String {
    let mut out = String::with_capacity(fields.iter().map(|field| field.len() + 1).sum());
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            out.push(DELIMITER);
        }
        out.push_str(field);
    }
    out
}
