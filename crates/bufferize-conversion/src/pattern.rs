//! Conversion pattern trait and the kind-keyed pattern table.

use std::borrow::Cow;
use std::collections::HashMap;

use bufferize_ir::{IrContext, OpKind, OpRef};

use crate::buffer_rewrite::{AttributePolicy, BufferRewritePattern};
use crate::error::ConversionResult;
use crate::rewriter::PatternRewriter;

/// A pattern that replaces one illegal operation.
///
/// `match_and_rewrite` both decides applicability and describes the edit
/// through the rewriter. Ops it creates stay detached; the driver inserts
/// them on success and destroys them on error, so returning `Err` at any
/// point is safe.
///
/// # Example
///
/// ```
/// use bufferize_conversion::{ConversionError, ConversionPattern, PatternRewriter};
/// use bufferize_conversion::error::ConversionResult;
/// use bufferize_ir::{IrContext, OpKind, OpRef};
///
/// /// Forwards the first operand and drops the op.
/// struct Forward;
///
/// impl ConversionPattern for Forward {
///     fn root_kind(&self) -> OpKind {
///         OpKind::new("source", "identity")
///     }
///
///     fn match_and_rewrite(
///         &self,
///         ctx: &mut IrContext,
///         op: OpRef,
///         rewriter: &mut PatternRewriter<'_>,
///     ) -> ConversionResult<()> {
///         let Some(&input) = ctx.op_operands(op).first() else {
///             return Err(ConversionError::not_applicable(self.name(), "no operand"));
///         };
///         rewriter.erase_op(vec![input]);
///         Ok(())
///     }
/// }
/// ```
pub trait ConversionPattern {
    /// The operation kind this pattern is registered under.
    fn root_kind(&self) -> OpKind;

    /// Record a replacement or erasure of `op` with `rewriter`, or explain
    /// why this pattern does not apply.
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter<'_>,
    ) -> ConversionResult<()>;

    /// Name used in diagnostics.
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }
}

/// Patterns grouped by root kind, tried in registration order.
#[derive(Default)]
pub struct PatternSet {
    patterns: HashMap<OpKind, Vec<Box<dyn ConversionPattern>>>,
    len: usize,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pattern` after any existing pattern for its root kind.
    pub fn add(mut self, pattern: impl ConversionPattern + 'static) -> Self {
        self.push(Box::new(pattern));
        self
    }

    /// Register the generic rewrite `src -> dst` with a verbatim attribute policy.
    pub fn add_buffer_rewrite(self, src: OpKind, dst: OpKind) -> Self {
        self.add(BufferRewritePattern::new(src, dst))
    }

    /// Like [`add_buffer_rewrite`](Self::add_buffer_rewrite), with required attributes.
    pub fn add_buffer_rewrite_with(self, src: OpKind, dst: OpKind, policy: AttributePolicy) -> Self {
        self.add(BufferRewritePattern::new(src, dst).with_policy(policy))
    }

    /// Register a boxed pattern without consuming the set.
    pub fn push(&mut self, pattern: Box<dyn ConversionPattern>) {
        self.patterns.entry(pattern.root_kind()).or_default().push(pattern);
        self.len += 1;
    }

    /// Patterns registered for `kind`, in registration order. Empty if none.
    pub fn patterns_for(&self, kind: OpKind) -> &[Box<dyn ConversionPattern>] {
        self.patterns.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of registered patterns across all kinds.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
