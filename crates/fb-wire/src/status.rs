//! Status vectors carried by generic responses.
//!
//! A status vector is a sequence of typed arguments terminated by
//! `isc_arg_end`. A non-zero `isc_arg_gds` starts an error entry, a non-zero
//! `isc_arg_warning` starts a warning entry, and the string and number
//! arguments that follow are parameters of the current entry.

use bytes::{Buf, BufMut};
use core::fmt;

use crate::codes::format_message;
use crate::error::ProtocolError;
use crate::xdr;

/// End of the status vector.
pub const ISC_ARG_END: i32 = 0;
/// Error code follows.
pub const ISC_ARG_GDS: i32 = 1;
/// String parameter follows.
pub const ISC_ARG_STRING: i32 = 2;
/// Counted string parameter follows.
pub const ISC_ARG_CSTRING: i32 = 3;
/// Numeric parameter follows.
pub const ISC_ARG_NUMBER: i32 = 4;
/// Preformatted message follows.
pub const ISC_ARG_INTERPRETED: i32 = 5;
/// Unix errno follows.
pub const ISC_ARG_UNIX: i32 = 7;
/// Windows error code follows.
pub const ISC_ARG_WIN32: i32 = 17;
/// Warning code follows.
pub const ISC_ARG_WARNING: i32 = 18;
/// SQLSTATE follows.
pub const ISC_ARG_SQL_STATE: i32 = 19;

/// One decoded status vector argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusArgument {
    /// Error code.
    Gds(i32),
    /// Warning code.
    Warning(i32),
    /// String parameter.
    String(String),
    /// Preformatted message.
    Interpreted(String),
    /// Numeric parameter.
    Number(i32),
    /// SQLSTATE of the error.
    SqlState(String),
    /// Operating system or other integer argument.
    Other {
        /// Argument type.
        kind: i32,
        /// Argument value.
        value: i32,
    },
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The operation failed.
    Error,
    /// The operation succeeded with a warning.
    Warning,
}

/// Server diagnostic assembled from a status vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: Severity,
    /// Primary code (the first code of the relevant severity).
    pub code: i32,
    /// Every code in the chain, primary first.
    pub codes: Vec<i32>,
    /// SQLSTATE, when the server sent one.
    pub sql_state: Option<String>,
    /// Rendered message.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "{} [SQLState:{}, ISC error code:{}]", self.message, state, self.code),
            None => write!(f, "{} [ISC error code:{}]", self.message, self.code),
        }
    }
}

/// Result of classifying a status vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// No error and no warning.
    Success,
    /// Warnings only.
    Warning(Diagnostic),
    /// At least one error.
    Error(Diagnostic),
}

/// A decoded status vector.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusVector {
    args: Vec<StatusArgument>,
}

impl StatusVector {
    /// Empty (successful) status vector.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// Status vector holding one error.
    #[must_use]
    pub fn error(code: i32) -> Self {
        Self {
            args: vec![StatusArgument::Gds(code)],
        }
    }

    /// Status vector holding one warning.
    #[must_use]
    pub fn warning(code: i32) -> Self {
        Self {
            args: vec![StatusArgument::Warning(code)],
        }
    }

    /// Append an argument.
    #[must_use]
    pub fn with(mut self, arg: StatusArgument) -> Self {
        self.args.push(arg);
        self
    }

    /// Decoded arguments, without the terminator.
    #[must_use]
    pub fn arguments(&self) -> &[StatusArgument] {
        &self.args
    }

    /// Whether neither an error nor a warning is present.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.classify(), StatusOutcome::Success)
    }

    /// Decode a status vector up to and including `isc_arg_end`.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut args = Vec::new();
        loop {
            let kind = xdr::read_i32(src)?;
            let arg = match kind {
                ISC_ARG_END => break,
                ISC_ARG_GDS => match xdr::read_i32(src)? {
                    0 => continue,
                    code => StatusArgument::Gds(code),
                },
                ISC_ARG_WARNING => match xdr::read_i32(src)? {
                    0 => continue,
                    code => StatusArgument::Warning(code),
                },
                ISC_ARG_STRING | ISC_ARG_CSTRING => StatusArgument::String(xdr::read_string(src)?),
                ISC_ARG_INTERPRETED => StatusArgument::Interpreted(xdr::read_string(src)?),
                ISC_ARG_SQL_STATE => StatusArgument::SqlState(xdr::read_string(src)?),
                ISC_ARG_NUMBER => StatusArgument::Number(xdr::read_i32(src)?),
                other => StatusArgument::Other {
                    kind: other,
                    value: xdr::read_i32(src)?,
                },
            };
            args.push(arg);
        }
        Ok(Self { args })
    }

    /// Encode the status vector including the terminator.
    pub fn encode(&self, dst: &mut impl BufMut) {
        for arg in &self.args {
            match arg {
                StatusArgument::Gds(code) => {
                    dst.put_i32(ISC_ARG_GDS);
                    dst.put_i32(*code);
                }
                StatusArgument::Warning(code) => {
                    dst.put_i32(ISC_ARG_WARNING);
                    dst.put_i32(*code);
                }
                StatusArgument::String(s) => {
                    dst.put_i32(ISC_ARG_STRING);
                    xdr::write_string(dst, s);
                }
                StatusArgument::Interpreted(s) => {
                    dst.put_i32(ISC_ARG_INTERPRETED);
                    xdr::write_string(dst, s);
                }
                StatusArgument::SqlState(s) => {
                    dst.put_i32(ISC_ARG_SQL_STATE);
                    xdr::write_string(dst, s);
                }
                StatusArgument::Number(n) => {
                    dst.put_i32(ISC_ARG_NUMBER);
                    dst.put_i32(*n);
                }
                StatusArgument::Other { kind, value } => {
                    dst.put_i32(*kind);
                    dst.put_i32(*value);
                }
            }
        }
        dst.put_i32(ISC_ARG_END);
    }

    /// Classify the vector. Errors take precedence over warnings.
    #[must_use]
    pub fn classify(&self) -> StatusOutcome {
        if let Some(start) = self.args.iter().position(|a| matches!(a, StatusArgument::Gds(_))) {
            return StatusOutcome::Error(self.assemble(Severity::Error, start));
        }
        if let Some(start) = self.args.iter().position(|a| matches!(a, StatusArgument::Warning(_))) {
            return StatusOutcome::Warning(self.assemble(Severity::Warning, start));
        }
        StatusOutcome::Success
    }

    fn assemble(&self, severity: Severity, start: usize) -> Diagnostic {
        let mut codes = Vec::new();
        let mut sql_state = None;
        let mut segments: Vec<String> = Vec::new();
        let mut current: Option<(i32, Vec<String>)> = None;

        let flush = |current: &mut Option<(i32, Vec<String>)>, segments: &mut Vec<String>| {
            if let Some((code, params)) = current.take() {
                segments.push(format_message(code, &params));
            }
        };

        for arg in &self.args[start..] {
            match arg {
                StatusArgument::Gds(code) | StatusArgument::Warning(code) => {
                    let same_severity = matches!(
                        (arg, severity),
                        (StatusArgument::Gds(_), Severity::Error)
                            | (StatusArgument::Warning(_), Severity::Warning)
                    );
                    if !same_severity {
                        // Warnings trailing an error belong to a separate chain.
                        break;
                    }
                    flush(&mut current, &mut segments);
                    codes.push(*code);
                    current = Some((*code, Vec::new()));
                }
                StatusArgument::String(s) => {
                    if let Some((_, params)) = current.as_mut() {
                        params.push(s.clone());
                    }
                }
                StatusArgument::Number(n) => {
                    if let Some((_, params)) = current.as_mut() {
                        params.push(n.to_string());
                    }
                }
                StatusArgument::Interpreted(s) => {
                    flush(&mut current, &mut segments);
                    segments.push(s.clone());
                }
                StatusArgument::SqlState(s) => {
                    if sql_state.is_none() {
                        sql_state = Some(s.clone());
                    }
                }
                StatusArgument::Other { .. } => {}
            }
        }
        flush(&mut current, &mut segments);

        Diagnostic {
            severity,
            code: codes.first().copied().unwrap_or_default(),
            codes,
            sql_state,
            message: segments.join("; "),
        }
    }
}
