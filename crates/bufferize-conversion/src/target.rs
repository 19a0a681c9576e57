//! Conversion target: the legality oracle.
//!
//! Two tiers decide whether an operation already satisfies the target
//! representation. Static rules name op kinds or whole dialects as always
//! legal or always illegal, regardless of types. Everything else goes to a
//! dynamic predicate evaluated on the op instance.

use std::collections::HashSet;
use std::fmt;
use std::ops::ControlFlow;

use bufferize_ir::walk::{self, WalkAction};
use bufferize_ir::{IrContext, OpKind, OpRef, RegionRef, Symbol};
use tracing::trace;

use crate::names;

/// Outcome of a legality query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegalityCheck {
    /// The op satisfies the target and is left alone.
    Legal,
    /// The op must be rewritten by a pattern.
    Illegal,
}

type DynamicPredicate = dyn Fn(&IrContext, OpRef) -> bool;

/// Default dynamic predicate: legal iff no operand or result is a tensor.
pub fn no_source_types(ctx: &IrContext, op: OpRef) -> bool {
    let operands = ctx.op_operands(op).iter().map(|&v| ctx.value_ty(v));
    let results = ctx.op_result_types(op).iter().copied();
    !operands.chain(results).any(|ty| ctx.types.is_source(ty))
}

/// Decides which operations the target representation accepts.
///
/// Static rules are kept per op kind and per dialect. Kinds with no static
/// rule, and kinds marked dynamic, go to a replaceable predicate that
/// defaults to [`no_source_types`]. See [`check`](Self::check) for the
/// resolution order.
pub struct ConversionTarget {
    legal_ops: HashSet<OpKind>,
    illegal_ops: HashSet<OpKind>,
    dynamic_ops: HashSet<OpKind>,
    legal_dialects: HashSet<Symbol>,
    illegal_dialects: HashSet<Symbol>,
    predicate: Box<DynamicPredicate>,
}

impl ConversionTarget {
    /// An empty target: every op is judged by [`no_source_types`].
    pub fn new() -> Self {
        Self {
            legal_ops: HashSet::new(),
            illegal_ops: HashSet::new(),
            dynamic_ops: HashSet::new(),
            legal_dialects: HashSet::new(),
            illegal_dialects: HashSet::new(),
            predicate: Box::new(no_source_types),
        }
    }

    /// Target for tensor-to-buffer lowering.
    ///
    /// Module and function containers and the `buffer.cast` materialization
    /// are always legal, as are the `buffer` and `target` dialects. Any other
    /// op is legal once it no longer touches a tensor.
    pub fn buffer_target() -> Self {
        let mut target = Self::new();
        target.add_legal_op(names::core_module());
        target.add_legal_op(names::func_func());
        target.add_legal_op(names::buffer_cast());
        target.legal_dialects.insert(names::BUFFER());
        target.legal_dialects.insert(names::TARGET());
        target
    }

    /// Mark `kind` legal whatever its types.
    pub fn add_legal_op(&mut self, kind: OpKind) {
        self.legal_ops.insert(kind);
    }

    /// Mark `kind` illegal whatever its types. Wins over every other rule.
    pub fn add_illegal_op(&mut self, kind: OpKind) {
        self.illegal_ops.insert(kind);
    }

    /// Judge `kind` with the predicate even if its dialect has a static rule.
    pub fn add_dynamic_op(&mut self, kind: OpKind) {
        self.dynamic_ops.insert(kind);
    }

    /// Mark every op in `namespace` legal unless an op rule says otherwise.
    pub fn add_legal_dialect(&mut self, namespace: &str) {
        self.legal_dialects.insert(Symbol::from_dynamic(namespace));
    }

    /// Mark every op in `namespace` illegal unless an op rule says otherwise.
    /// Wins over a legal rule for the same dialect.
    pub fn add_illegal_dialect(&mut self, namespace: &str) {
        self.illegal_dialects.insert(Symbol::from_dynamic(namespace));
    }

    /// Replace the dynamic predicate.
    pub fn set_dynamic_predicate(&mut self, f: impl Fn(&IrContext, OpRef) -> bool + 'static) {
        self.predicate = Box::new(f);
    }

    /// Resolution order: illegal op, legal op, dynamic op, illegal dialect,
    /// legal dialect, then the predicate.
    pub fn check(&self, ctx: &IrContext, op: OpRef) -> LegalityCheck {
        let kind = ctx.op_kind(op);
        let legal = if self.illegal_ops.contains(&kind) {
            false
        } else if self.legal_ops.contains(&kind) {
            true
        } else if self.dynamic_ops.contains(&kind) {
            (self.predicate)(ctx, op)
        } else if self.illegal_dialects.contains(&kind.dialect) {
            false
        } else if self.legal_dialects.contains(&kind.dialect) {
            true
        } else {
            (self.predicate)(ctx, op)
        };
        trace!(%op, %kind, legal, "legality check");
        if legal {
            LegalityCheck::Legal
        } else {
            LegalityCheck::Illegal
        }
    }

    /// Shorthand for `check(..) == LegalityCheck::Legal`.
    pub fn is_legal(&self, ctx: &IrContext, op: OpRef) -> bool {
        self.check(ctx, op) == LegalityCheck::Legal
    }

    /// Every illegal op nested in `region`, in pre-order.
    pub fn verify(&self, ctx: &IrContext, region: RegionRef) -> Vec<IllegalOp> {
        let mut illegal = Vec::new();
        let _ = walk::walk_region::<()>(ctx, region, &mut |op| {
            if !self.is_legal(ctx, op) {
                illegal.push(IllegalOp {
                    op,
                    kind: ctx.op_kind(op),
                });
            }
            ControlFlow::Continue(WalkAction::Advance)
        });
        illegal
    }
}

impl Default for ConversionTarget {
    fn default() -> Self {
        Self::new()
    }
}

/// An op found illegal by [`ConversionTarget::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalOp {
    pub op: OpRef,
    pub kind: OpKind,
}

impl fmt::Display for IllegalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.op)
    }
}
