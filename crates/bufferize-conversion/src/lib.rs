//! Legality-driven rewriting from tensor-like values to explicit buffers.
//!
//! The pieces, leaf first:
//!
//! - [`TypeConverter`] maps source types to target types and builds the
//!   cast operations needed at a representation boundary.
//! - [`ConversionTarget`] decides whether an operation is already legal.
//! - [`ConversionPattern`]s, grouped by root kind in a [`PatternSet`],
//!   replace illegal operations. [`BufferRewritePattern`] is the generic,
//!   data-driven pattern most kinds use.
//! - [`Legalizer`] runs the worklist until nothing illegal is left or every
//!   remaining failure has been recorded.

pub mod buffer_rewrite;
pub mod driver;
pub mod error;
pub mod names;
pub mod pattern;
pub mod rewriter;
pub mod target;
pub mod type_converter;

pub use buffer_rewrite::{
    AttributePolicy, BufferRewritePattern, RequiredAttribute, apply_default_buffer_rewrite,
};
pub use driver::{LegalizeConfig, LegalizeReport, Legalizer, OpState, legalize};
pub use error::{ConversionError, LegalizeError, OperationFailure};
pub use pattern::{ConversionPattern, PatternSet};
pub use rewriter::PatternRewriter;
pub use target::{ConversionTarget, IllegalOp, LegalityCheck, no_source_types};
pub use type_converter::{MaterializeResult, TypeConverter};
