//! PatternRewriter: records what a pattern wants done to the graph.
//!
//! Patterns create detached ops through the context and describe the edit
//! through the rewriter. The driver then either commits the edit (insert,
//! RAUW, erase) or discards every op the attempt created, so a failed
//! attempt leaves the graph as it found it.

use std::collections::HashMap;

use bufferize_ir::{IrContext, OpRef, TypeRef, ValueDef, ValueRef};
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{ConversionResult, LegalizeError};
use crate::type_converter::TypeConverter;

/// Pass-scoped record of materialized values, keyed by (source value,
/// target type). Dropped with the pass.
#[derive(Default)]
pub(crate) struct MaterializationCache {
    enabled: bool,
    entries: HashMap<(ValueRef, TypeRef), ValueRef>,
}

impl MaterializationCache {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: HashMap::new(),
        }
    }

    /// A cached value usable as an operand of `user`: defined by a live op
    /// that sits earlier in the same block.
    fn lookup(&self, ctx: &IrContext, user: OpRef, key: (ValueRef, TypeRef)) -> Option<ValueRef> {
        if !self.enabled {
            return None;
        }
        let cached = *self.entries.get(&key)?;
        let ValueDef::OpResult(def_op, _) = ctx.value_def(cached) else {
            return None;
        };
        if ctx.is_erased(def_op) || ctx.op(def_op).parent_block != ctx.op(user).parent_block {
            return None;
        }
        match (ctx.op_position(def_op), ctx.op_position(user)) {
            (Some(def_pos), Some(user_pos)) if def_pos < user_pos => Some(cached),
            _ => None,
        }
    }

    pub(crate) fn commit(&mut self, pending: Vec<((ValueRef, TypeRef), ValueRef)>) {
        if self.enabled {
            self.entries.extend(pending);
        }
    }
}

/// Edit recorded by one pattern attempt.
#[derive(Default)]
pub(crate) struct Mutations {
    pub(crate) prefix_ops: Vec<OpRef>,
    pub(crate) replacement: Option<OpRef>,
    pub(crate) erase_values: Option<Vec<ValueRef>>,
}

/// What a committed edit changed.
pub(crate) struct Applied {
    /// Ops newly attached to the graph: prefix ops, then the replacement.
    pub(crate) inserted: Vec<OpRef>,
    /// Values that took over the uses of the old results.
    pub(crate) new_values: SmallVec<[ValueRef; 4]>,
    pub(crate) materialized: usize,
}

pub struct PatternRewriter<'a> {
    converter: &'a TypeConverter,
    cache: &'a MaterializationCache,
    op: OpRef,
    mutations: Mutations,
    pending_cache: Vec<((ValueRef, TypeRef), ValueRef)>,
    materialized: usize,
}

impl<'a> PatternRewriter<'a> {
    pub(crate) fn new(
        converter: &'a TypeConverter,
        cache: &'a MaterializationCache,
        op: OpRef,
    ) -> Self {
        Self {
            converter,
            cache,
            op,
            mutations: Mutations::default(),
            pending_cache: Vec::new(),
            materialized: 0,
        }
    }

    pub fn type_converter(&self) -> &TypeConverter {
        self.converter
    }

    /// The operation being rewritten; also the insertion point.
    pub fn op(&self) -> OpRef {
        self.op
    }

    /// Produce a value of type `to_ty` for `value`, to be used as an operand
    /// of the replacement.
    ///
    /// Values already of `to_ty` are returned unchanged. Otherwise a value
    /// materialized earlier in the same block (this pass) or earlier in this
    /// attempt is reused, and failing that the converter's materializer
    /// builds new ops that will be inserted before the rewritten op.
    pub fn materialize_operand(
        &mut self,
        ctx: &mut IrContext,
        value: ValueRef,
        to_ty: TypeRef,
    ) -> ConversionResult<ValueRef> {
        if ctx.value_ty(value) == to_ty {
            return Ok(value);
        }
        let key = (value, to_ty);
        if let Some(&(_, v)) = self.pending_cache.iter().find(|(k, _)| *k == key) {
            return Ok(v);
        }
        if let Some(v) = self.cache.lookup(ctx, self.op, key) {
            trace!(%value, reused = %v, "reusing materialization");
            return Ok(v);
        }

        let location = ctx.op(self.op).location;
        let result = self.converter.materialize(ctx, location, value, to_ty)?;
        trace!(%value, into = %result.value, ops = result.ops.len(), "materialized operand");
        self.materialized += result.ops.len();
        self.mutations.prefix_ops.extend(result.ops);
        self.pending_cache.push((key, result.value));
        Ok(result.value)
    }

    /// Queue a detached op for insertion before the rewritten op.
    pub fn insert_op(&mut self, op: OpRef) {
        self.mutations.prefix_ops.push(op);
    }

    /// Replace the rewritten op with `new_op`; results are redirected by index.
    pub fn replace_op(&mut self, new_op: OpRef) {
        debug_assert!(
            self.mutations.replacement.is_none() && self.mutations.erase_values.is_none(),
            "replace_op called twice or after erase_op"
        );
        self.mutations.replacement = Some(new_op);
    }

    /// Erase the rewritten op, redirecting its results to `values`.
    pub fn erase_op(&mut self, values: Vec<ValueRef>) {
        debug_assert!(
            self.mutations.replacement.is_none() && self.mutations.erase_values.is_none(),
            "erase_op called twice or after replace_op"
        );
        self.mutations.erase_values = Some(values);
    }

    pub(crate) fn finish(self) -> (Mutations, Vec<((ValueRef, TypeRef), ValueRef)>, usize) {
        (self.mutations, self.pending_cache, self.materialized)
    }
}

/// Commit a successful attempt on `op`.
pub(crate) fn apply_mutations(
    ctx: &mut IrContext,
    op: OpRef,
    mutations: Mutations,
    materialized: usize,
) -> Result<Applied, LegalizeError> {
    let Some(block) = ctx.op(op).parent_block else {
        return Err(invariant(format!("{op} is not attached to a block")));
    };

    let new_values: SmallVec<[ValueRef; 4]> = match (&mutations.replacement, &mutations.erase_values) {
        (Some(new_op), None) => ctx.op_results(*new_op).into(),
        (None, Some(values)) => values.iter().copied().collect(),
        _ => {
            return Err(invariant(format!(
                "pattern for {op} reported success without replacing or erasing it"
            )));
        }
    };
    let old_results: SmallVec<[ValueRef; 4]> = ctx.op_results(op).into();
    if old_results.len() != new_values.len() {
        return Err(invariant(format!(
            "replacement of {op} has {} result(s), expected {}",
            new_values.len(),
            old_results.len()
        )));
    }

    let mut inserted = Vec::with_capacity(mutations.prefix_ops.len() + 1);
    for &prefix in &mutations.prefix_ops {
        ctx.insert_op_before(block, op, prefix);
        inserted.push(prefix);
    }
    if let Some(new_op) = mutations.replacement {
        ctx.insert_op_before(block, op, new_op);
        inserted.push(new_op);
    }

    for (&old, &new) in old_results.iter().zip(&new_values) {
        ctx.replace_all_uses(old, new);
    }
    ctx.erase_op(op);

    Ok(Applied {
        inserted,
        new_values,
        materialized,
    })
}

/// Destroy every op a failed attempt created, newest first.
///
/// Regions the replacement adopted from `op` are handed back to `op` first,
/// so they are not destroyed along with it.
pub(crate) fn discard_mutations(ctx: &mut IrContext, op: OpRef, mutations: Mutations) {
    if let Some(new_op) = mutations.replacement {
        let regions = ctx.take_regions(new_op);
        if !regions.is_empty() {
            trace!(%op, %new_op, regions = regions.len(), "returning regions to source op");
            ctx.adopt_regions(op, regions);
        }
        ctx.remove_op(new_op);
    }
    for op in mutations.prefix_ops.into_iter().rev() {
        ctx.remove_op(op);
    }
}

fn invariant(message: String) -> LegalizeError {
    LegalizeError::InvariantViolation { message }
}
