//! The generic tensor-to-buffer rewrite.
//!
//! One [`BufferRewritePattern`] value covers a (source kind, target kind)
//! pair: result types go through the type converter, tensor operands are
//! materialized into buffers, and the replacement carries the source's
//! attributes unchanged.

use std::borrow::Cow;

use bufferize_ir::{AttributeKind, IrContext, OpKind, OpRef, OperationDataBuilder, Symbol};
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{ConversionError, ConversionResult};
use crate::pattern::ConversionPattern;
use crate::rewriter::PatternRewriter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequiredAttribute {
    pub name: Symbol,
    pub kind: AttributeKind,
}

/// Attribute handling for a rewrite.
///
/// Attributes are always copied verbatim. The policy only lists attributes
/// that must be present with a given kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributePolicy {
    required: Vec<RequiredAttribute>,
}

impl AttributePolicy {
    pub fn verbatim() -> Self {
        Self::default()
    }

    pub fn require(mut self, name: impl Into<Symbol>, kind: AttributeKind) -> Self {
        self.required.push(RequiredAttribute {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn required(&self) -> &[RequiredAttribute] {
        &self.required
    }

    /// Fails with `MalformedOperation` on the first missing or mistyped attribute.
    pub fn check(&self, ctx: &IrContext, op: OpRef) -> ConversionResult<()> {
        let data = ctx.op(op);
        for req in &self.required {
            match data.attributes.get(&req.name) {
                None => {
                    return Err(ConversionError::malformed(
                        data.kind,
                        format!("missing required attribute `{}`", req.name),
                    ));
                }
                Some(attr) if attr.kind() != req.kind => {
                    return Err(ConversionError::malformed(
                        data.kind,
                        format!(
                            "attribute `{}` must be {}, found {}",
                            req.name,
                            req.kind,
                            attr.kind()
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Rewrites `src` ops into `dst` ops over buffers.
#[derive(Clone, Debug)]
pub struct BufferRewritePattern {
    src: OpKind,
    dst: OpKind,
    policy: AttributePolicy,
}

impl BufferRewritePattern {
    pub fn new(src: OpKind, dst: OpKind) -> Self {
        Self {
            src,
            dst,
            policy: AttributePolicy::verbatim(),
        }
    }

    pub fn with_policy(mut self, policy: AttributePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn target_kind(&self) -> OpKind {
        self.dst
    }

    pub fn policy(&self) -> &AttributePolicy {
        &self.policy
    }
}

impl ConversionPattern for BufferRewritePattern {
    fn root_kind(&self) -> OpKind {
        self.src
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter<'_>,
    ) -> ConversionResult<()> {
        apply_default_buffer_rewrite(ctx, op, self.dst, &self.policy, rewriter).map_err(|err| {
            match err {
                ConversionError::UnsupportedType { .. } => {
                    ConversionError::not_applicable(self.name(), err)
                }
                other => other,
            }
        })
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Owned(format!("buffer-rewrite({} -> {})", self.src, self.dst))
    }
}

/// Rewrite `op` into a `dst_kind` op with converted types.
///
/// Checks run before any op is created: required attributes, then result
/// types, then operand materialization. On success the replacement is
/// recorded with the rewriter; its operands are the original operands with
/// every source-typed value materialized into its converted type.
/// Target-typed and neutral operands pass through. Regions move to the
/// replacement.
pub fn apply_default_buffer_rewrite(
    ctx: &mut IrContext,
    op: OpRef,
    dst_kind: OpKind,
    policy: &AttributePolicy,
    rewriter: &mut PatternRewriter<'_>,
) -> ConversionResult<()> {
    policy.check(ctx, op)?;

    let old_types: SmallVec<[_; 4]> = ctx.op_result_types(op).into();
    let mut result_types = SmallVec::<[_; 4]>::with_capacity(old_types.len());
    for ty in old_types {
        result_types.push(rewriter.type_converter().convert_type(ctx, ty)?);
    }

    let old_operands: SmallVec<[_; 4]> = ctx.op_operands(op).into();
    let mut operands = SmallVec::<[_; 4]>::with_capacity(old_operands.len());
    for value in old_operands {
        let ty = ctx.value_ty(value);
        if !ctx.types.is_source(ty) {
            operands.push(value);
            continue;
        }
        let to_ty = rewriter.type_converter().convert_type(ctx, ty)?;
        operands.push(rewriter.materialize_operand(ctx, value, to_ty)?);
    }

    let location = ctx.op(op).location;
    let attributes = ctx.op(op).attributes.clone();
    let regions = ctx.take_regions(op);
    let data = OperationDataBuilder::new(location, dst_kind)
        .operands(operands)
        .results(result_types)
        .attrs(attributes)
        .regions(regions)
        .build(ctx);
    let new_op = ctx.create_op(data);
    trace!(%op, %new_op, kind = %dst_kind, "built replacement");
    rewriter.replace_op(new_op);
    Ok(())
}
