//! Error taxonomy for conversion.
//!
//! [`ConversionError`] is local to one rewrite attempt; the driver collects
//! these per operation. [`LegalizeError`] is what a pass returns.

use std::fmt;

use bufferize_ir::{IrContext, Location, OpKind, OpRef, TypeRef, printer};
use derive_more::{Display, Error};

pub type ConversionResult<T> = Result<T, ConversionError>;

#[derive(Clone, Debug, PartialEq, Eq, Display, Error)]
pub enum ConversionError {
    /// The pattern does not apply; the next candidate is tried.
    #[display("PatternNotApplicable: {pattern}: {reason}")]
    PatternNotApplicable { pattern: String, reason: String },

    /// No mapping exists for a source type; recovered like `PatternNotApplicable`.
    #[display("UnsupportedType: no conversion for `{ty}`")]
    UnsupportedType { ty: String },

    /// The operation itself is broken. Fatal to this op's rewrite only.
    #[display("MalformedOperation: `{kind}`: {reason}")]
    MalformedOperation { kind: OpKind, reason: String },
}

impl ConversionError {
    pub fn not_applicable(pattern: impl Into<String>, reason: impl fmt::Display) -> Self {
        ConversionError::PatternNotApplicable {
            pattern: pattern.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported_type(ctx: &IrContext, ty: TypeRef) -> Self {
        ConversionError::UnsupportedType {
            ty: printer::print_type(ctx, ty),
        }
    }

    pub fn malformed(kind: OpKind, reason: impl fmt::Display) -> Self {
        ConversionError::MalformedOperation {
            kind,
            reason: reason.to_string(),
        }
    }

    /// Whether the driver may go on to the next candidate pattern.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ConversionError::MalformedOperation { .. })
    }
}

/// An operation left unconverted, with the reason from every attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationFailure {
    pub op: OpRef,
    pub kind: OpKind,
    pub location: Location,
    pub reasons: Vec<ConversionError>,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` ({})", self.kind, self.op)?;
        for (i, reason) in self.reasons.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{reason}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Display, Error)]
pub enum LegalizeError {
    /// The worklist drained with operations still failed or illegal.
    #[display("failed to legalize {} operation(s): {}", failures.len(), display_failures(failures))]
    Unlegalizable {
        #[error(not(source))]
        failures: Vec<OperationFailure>,
    },

    /// More rewrites than the configured limit; a pattern is likely
    /// reintroducing the kind it replaces.
    #[display("rewrite limit of {limit} exceeded")]
    RewriteLimitExceeded { limit: usize },

    /// A graph invariant broke mid-pass. Completed rewrites stay applied.
    #[display("graph invariant violated: {message}")]
    InvariantViolation {
        #[error(not(source))]
        message: String,
    },
}

impl LegalizeError {
    /// Failures when the pass ended unlegalized; empty for aborts.
    pub fn failures(&self) -> &[OperationFailure] {
        match self {
            LegalizeError::Unlegalizable { failures } => failures,
            _ => &[],
        }
    }
}

fn display_failures(failures: &[OperationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
