//! Worklist legalization driver.
//!
//! Every op nested under the root starts `Pending`. Popping an op either
//! marks it `Legal`, rewrites it through the first pattern that succeeds
//! (`Rewritten`), or records why every candidate failed (`Failed`). A
//! rewrite requeues the ops it inserted and every consumer of the new
//! results, since their legality may have changed.

use std::collections::{BTreeMap, VecDeque};

use bufferize_ir::walk::collect_nested_ops;
use bufferize_ir::{IrContext, OpRef};
use cranelift_entity::SecondaryMap;
use tracing::{debug, trace, warn};

use crate::error::{ConversionError, LegalizeError, OperationFailure};
use crate::pattern::PatternSet;
use crate::rewriter::{
    Applied, MaterializationCache, PatternRewriter, apply_mutations, discard_mutations,
};
use crate::target::ConversionTarget;
use crate::type_converter::TypeConverter;

/// Knobs for one legalization run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LegalizeConfig {
    /// Abort with `RewriteLimitExceeded` instead of performing more than
    /// this many rewrites. `None` is unbounded.
    pub max_rewrites: Option<usize>,
    /// Reuse a value materialized earlier in the same block for the same
    /// (value, type) pair instead of emitting another cast.
    pub reuse_materializations: bool,
}

impl Default for LegalizeConfig {
    fn default() -> Self {
        Self {
            max_rewrites: None,
            reuse_materializations: true,
        }
    }
}

impl LegalizeConfig {
    pub fn with_max_rewrites(mut self, limit: usize) -> Self {
        self.max_rewrites = Some(limit);
        self
    }

    pub fn with_reuse_materializations(mut self, reuse: bool) -> Self {
        self.reuse_materializations = reuse;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpState {
    Pending,
    Legal,
    Rewritten,
    Failed,
}

/// Counters for a successful run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LegalizeReport {
    /// Ops replaced or erased by a pattern.
    pub rewritten: usize,
    /// Live ops that ended the run legal.
    pub legal: usize,
    /// Materialization ops inserted.
    pub materialized: usize,
    /// Worklist pops, counting requeued ops once per pop.
    pub visited: usize,
}

pub struct Legalizer<'a> {
    target: &'a ConversionTarget,
    converter: &'a TypeConverter,
    patterns: &'a PatternSet,
    config: LegalizeConfig,
}

impl<'a> Legalizer<'a> {
    pub fn new(
        target: &'a ConversionTarget,
        converter: &'a TypeConverter,
        patterns: &'a PatternSet,
    ) -> Self {
        Self {
            target,
            converter,
            patterns,
            config: LegalizeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LegalizeConfig) -> Self {
        self.config = config;
        self
    }

    /// Legalize every op nested under `root`. `root` itself is not visited.
    ///
    /// On `Unlegalizable` the graph holds every rewrite that succeeded;
    /// callers are expected to discard it.
    pub fn run(&self, ctx: &mut IrContext, root: OpRef) -> Result<LegalizeReport, LegalizeError> {
        let mut worklist = Worklist::default();
        for op in collect_nested_ops(ctx, root) {
            worklist.enqueue(ctx, op);
        }
        debug!(%root, ops = worklist.queue.len(), "legalize: start");

        let mut cache = MaterializationCache::new(self.config.reuse_materializations);
        let mut report = LegalizeReport::default();

        while let Some(op) = worklist.pop() {
            if ctx.is_erased(op) {
                continue;
            }
            report.visited += 1;

            if self.target.is_legal(ctx, op) {
                worklist.states[op] = Some(OpState::Legal);
                continue;
            }

            match self.rewrite(ctx, op, &mut cache, &report)? {
                Ok(applied) => {
                    worklist.states[op] = Some(OpState::Rewritten);
                    report.rewritten += 1;
                    report.materialized += applied.materialized;
                    for &new_op in &applied.inserted {
                        worklist.enqueue(ctx, new_op);
                    }
                    for &value in &applied.new_values {
                        let users: Vec<OpRef> = ctx.uses(value).iter().map(|u| u.user).collect();
                        for user in users {
                            worklist.enqueue(ctx, user);
                        }
                    }
                }
                Err(reasons) => {
                    warn!(%op, kind = %ctx.op_kind(op), attempts = reasons.len(), "legalize: no pattern succeeded");
                    worklist.states[op] = Some(OpState::Failed);
                    worklist.failures.insert(op, reasons);
                }
            }
        }

        for &region in &ctx.op(root).regions {
            for illegal in self.target.verify(ctx, region) {
                if worklist.failures.contains_key(&illegal.op) {
                    continue;
                }
                warn!(op = %illegal.op, kind = %illegal.kind, "legalize: still illegal after worklist drained");
                worklist.states[illegal.op] = Some(OpState::Failed);
                worklist.failures.insert(
                    illegal.op,
                    vec![ConversionError::not_applicable(
                        illegal.kind.to_string(),
                        "operation is still illegal after legalization",
                    )],
                );
            }
        }

        let failures: Vec<OperationFailure> = worklist
            .failures
            .into_iter()
            .filter(|(op, _)| !ctx.is_erased(*op))
            .map(|(op, reasons)| OperationFailure {
                op,
                kind: ctx.op_kind(op),
                location: ctx.op(op).location,
                reasons,
            })
            .collect();
        if !failures.is_empty() {
            debug!(failed = failures.len(), rewritten = report.rewritten, "legalize: failed");
            return Err(LegalizeError::Unlegalizable { failures });
        }

        report.legal = worklist
            .states
            .iter()
            .filter(|(op, state)| **state == Some(OpState::Legal) && !ctx.is_erased(*op))
            .count();
        debug!(
            rewritten = report.rewritten,
            materialized = report.materialized,
            legal = report.legal,
            visited = report.visited,
            "legalize: done"
        );
        Ok(report)
    }

    /// Try each pattern registered for `op`'s kind in order.
    ///
    /// The outer error aborts the pass; the inner one carries the reason
    /// from every attempt.
    fn rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        cache: &mut MaterializationCache,
        report: &LegalizeReport,
    ) -> Result<Result<Applied, Vec<ConversionError>>, LegalizeError> {
        let kind = ctx.op_kind(op);
        let patterns = self.patterns.patterns_for(kind);
        if patterns.is_empty() {
            return Ok(Err(vec![ConversionError::not_applicable(
                kind.to_string(),
                "no pattern registered for this kind",
            )]));
        }

        // No pattern runs once the limit is reached.
        if let Some(limit) = self.config.max_rewrites {
            if report.rewritten >= limit {
                warn!(%op, %kind, limit, "legalize: rewrite limit reached");
                return Err(LegalizeError::RewriteLimitExceeded { limit });
            }
        }

        let mut reasons = Vec::new();
        for pattern in patterns {
            let mut rewriter = PatternRewriter::new(self.converter, cache, op);
            match pattern.match_and_rewrite(ctx, op, &mut rewriter) {
                Ok(()) => {
                    let (mutations, pending, materialized) = rewriter.finish();
                    let applied = apply_mutations(ctx, op, mutations, materialized)?;
                    cache.commit(pending);
                    debug!(%op, %kind, pattern = %pattern.name(), inserted = applied.inserted.len(), "legalize: rewrote");
                    return Ok(Ok(applied));
                }
                Err(err) => {
                    let (mutations, _, _) = rewriter.finish();
                    discard_mutations(ctx, op, mutations);
                    trace!(%op, pattern = %pattern.name(), %err, "legalize: pattern failed");
                    let fatal = !err.is_recoverable();
                    reasons.push(err);
                    if fatal {
                        break;
                    }
                }
            }
        }
        Ok(Err(reasons))
    }
}

/// Shorthand for `Legalizer::new(target, converter, patterns).run(ctx, root)`.
pub fn legalize(
    ctx: &mut IrContext,
    root: OpRef,
    target: &ConversionTarget,
    converter: &TypeConverter,
    patterns: &PatternSet,
) -> Result<LegalizeReport, LegalizeError> {
    Legalizer::new(target, converter, patterns).run(ctx, root)
}

#[derive(Default)]
struct Worklist {
    queue: VecDeque<OpRef>,
    queued: SecondaryMap<OpRef, bool>,
    states: SecondaryMap<OpRef, Option<OpState>>,
    failures: BTreeMap<OpRef, Vec<ConversionError>>,
}

impl Worklist {
    /// Queue `op` as `Pending`, dropping any earlier failure.
    fn enqueue(&mut self, ctx: &IrContext, op: OpRef) {
        if self.queued[op] || ctx.is_erased(op) {
            return;
        }
        if self.states[op] == Some(OpState::Failed) {
            trace!(%op, "legalize: requeue failed op");
        }
        self.failures.remove(&op);
        self.states[op] = Some(OpState::Pending);
        self.queued[op] = true;
        self.queue.push_back(op);
    }

    fn pop(&mut self) -> Option<OpRef> {
        let op = self.queue.pop_front()?;
        self.queued[op] = false;
        Some(op)
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::buffer_rewrite::AttributePolicy;
    use crate::error::ConversionResult;
    use crate::names;
    use crate::pattern::ConversionPattern;
    use bufferize_ir::*;
    use smallvec::smallvec;

    struct Module {
        ctx: IrContext,
        loc: Location,
        root: OpRef,
        body: BlockRef,
        tensor: TypeRef,
        buffer: TypeRef,
    }

    /// A `core.module` whose body block takes `args` as block arguments.
    fn module(args: &[&str]) -> Module {
        let mut ctx = IrContext::new();
        let path = ctx.paths.intern("test.mlir");
        let loc = Location::new(path, Span::new(0, 0));
        let tensor = ctx.intern_type(TypeData::tensor(ElementType::F32, &[4]));
        let buffer = ctx.intern_type(TypeData::buffer(ElementType::F32, &[4], Layout::RowMajor));
        let args = args
            .iter()
            .map(|a| BlockArgData {
                ty: if *a == "tensor" { tensor } else { buffer },
            })
            .collect();
        let body = ctx.create_block(BlockData {
            location: loc,
            args,
            ops: smallvec![],
            parent_region: None,
        });
        let region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![body],
            parent_op: None,
        });
        let data = OperationDataBuilder::new(loc, names::core_module())
            .region(region)
            .build(&mut ctx);
        let root = ctx.create_op(data);
        Module {
            ctx,
            loc,
            root,
            body,
            tensor,
            buffer,
        }
    }

    impl Module {
        fn arg(&self, index: u32) -> ValueRef {
            self.ctx.block_arg(self.body, index)
        }

        fn push(&mut self, kind: &str, operands: &[ValueRef], result: TypeRef) -> OpRef {
            let data = OperationDataBuilder::new(self.loc, OpKind::parse(kind).unwrap())
                .operands(operands.iter().copied())
                .result(result)
                .build(&mut self.ctx);
            let op = self.ctx.create_op(data);
            self.ctx.push_op(self.body, op);
            op
        }

        fn kinds(&self) -> Vec<String> {
            self.block_kinds(self.body)
        }

        fn block_kinds(&self, block: BlockRef) -> Vec<String> {
            self.ctx
                .block(block)
                .ops
                .iter()
                .map(|&op| self.ctx.op_kind(op).to_string())
                .collect()
        }

        /// Append `kind(operands) -> result` whose single region holds `body`.
        fn push_with_region(
            &mut self,
            kind: &str,
            operands: &[ValueRef],
            result: TypeRef,
            body: BlockRef,
        ) -> (OpRef, RegionRef) {
            let region = self.ctx.create_region(RegionData {
                location: self.loc,
                blocks: smallvec![body],
                parent_op: None,
            });
            let data = OperationDataBuilder::new(self.loc, OpKind::parse(kind).unwrap())
                .operands(operands.iter().copied())
                .result(result)
                .region(region)
                .build(&mut self.ctx);
            let op = self.ctx.create_op(data);
            self.ctx.push_op(self.body, op);
            (op, region)
        }

        /// A detached block holding one `kind(operands) -> result` op.
        fn block_with(
            &mut self,
            kind: &str,
            operands: &[ValueRef],
            result: TypeRef,
        ) -> (BlockRef, OpRef) {
            let block = self.ctx.create_block(BlockData {
                location: self.loc,
                args: vec![],
                ops: smallvec![],
                parent_region: None,
            });
            let data = OperationDataBuilder::new(self.loc, OpKind::parse(kind).unwrap())
                .operands(operands.iter().copied())
                .result(result)
                .build(&mut self.ctx);
            let op = self.ctx.create_op(data);
            self.ctx.push_op(block, op);
            (block, op)
        }
    }

    fn add_patterns() -> PatternSet {
        PatternSet::new()
            .add_buffer_rewrite(OpKind::new("source", "add"), OpKind::new("target", "add"))
            .add_buffer_rewrite(OpKind::new("source", "neg"), OpKind::new("target", "neg"))
    }

    fn run(m: &mut Module, patterns: &PatternSet) -> Result<LegalizeReport, LegalizeError> {
        let target = ConversionTarget::buffer_target();
        let converter = TypeConverter::buffer_converter(Layout::RowMajor);
        legalize(&mut m.ctx, m.root, &target, &converter, patterns)
    }

    #[test]
    fn rewrites_and_materializes_tensor_operands() {
        let mut m = module(&["tensor", "tensor"]);
        let (a, b, tensor) = (m.arg(0), m.arg(1), m.tensor);
        m.push("source.add", &[a, b], tensor);

        let report = run(&mut m, &add_patterns()).unwrap();

        assert_eq!(m.kinds(), ["buffer.cast", "buffer.cast", "target.add"]);
        assert_eq!(report.rewritten, 1);
        assert_eq!(report.materialized, 2);
        assert_eq!(report.legal, 3);
    }

    #[test]
    fn buffer_operands_need_no_casts() {
        let mut m = module(&["buffer", "buffer"]);
        let (a, b, tensor) = (m.arg(0), m.arg(1), m.tensor);
        m.push("source.add", &[a, b], tensor);

        let report = run(&mut m, &add_patterns()).unwrap();

        assert_eq!(m.kinds(), ["target.add"]);
        assert_eq!(report.materialized, 0);
        let add = m.ctx.block(m.body).ops[0];
        assert_eq!(m.ctx.op_operands(add), &[a, b]);
        assert_eq!(m.ctx.op_result_types(add), &[m.buffer]);
    }

    #[test]
    fn consumers_see_converted_results() {
        let mut m = module(&["buffer"]);
        let (a, tensor, buffer) = (m.arg(0), m.tensor, m.buffer);
        let neg = m.push("source.neg", &[a], tensor);
        let neg_out = m.ctx.op_result(neg, 0);
        let add = m.push("source.add", &[neg_out, neg_out], tensor);
        let add_out = m.ctx.op_result(add, 0);
        m.push("target.store", &[add_out], buffer);

        let report = run(&mut m, &add_patterns()).unwrap();

        // No casts: each consumer is rewritten after its producer already
        // yields a buffer.
        assert_eq!(m.kinds(), ["target.neg", "target.add", "target.store"]);
        assert_eq!(report.rewritten, 2);
        assert_eq!(report.materialized, 0);
        let ops = m.ctx.block(m.body).ops.clone();
        let new_neg = m.ctx.op_result(ops[0], 0);
        assert_eq!(m.ctx.op_operands(ops[1]), &[new_neg, new_neg]);
    }

    #[test]
    fn repeated_operand_is_materialized_once() {
        let mut m = module(&["tensor"]);
        let (a, tensor) = (m.arg(0), m.tensor);
        m.push("source.add", &[a, a], tensor);
        m.push("source.add", &[a, a], tensor);

        let report = run(&mut m, &add_patterns()).unwrap();
        assert_eq!(m.kinds(), ["buffer.cast", "target.add", "target.add"]);
        assert_eq!(report.materialized, 1);
    }

    #[test]
    fn reuse_can_be_disabled() {
        let mut m = module(&["tensor"]);
        let (a, tensor) = (m.arg(0), m.tensor);
        m.push("source.neg", &[a], tensor);
        m.push("source.neg", &[a], tensor);

        let target = ConversionTarget::buffer_target();
        let converter = TypeConverter::buffer_converter(Layout::RowMajor);
        let patterns = add_patterns();
        let config = LegalizeConfig::default().with_reuse_materializations(false);
        let report = Legalizer::new(&target, &converter, &patterns)
            .with_config(config)
            .run(&mut m.ctx, m.root)
            .unwrap();

        assert_eq!(report.materialized, 2);
        assert_eq!(
            m.kinds(),
            ["buffer.cast", "target.neg", "buffer.cast", "target.neg"]
        );
    }

    #[test]
    fn unknown_kind_fails_with_every_reason() {
        let mut m = module(&["buffer"]);
        let (a, tensor) = (m.arg(0), m.tensor);
        let good = m.push("source.neg", &[a], tensor);
        let bad = m.push("source.mystery", &[a], tensor);

        let err = run(&mut m, &add_patterns()).unwrap_err();

        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].op, bad);
        assert_eq!(failures[0].kind, OpKind::new("source", "mystery"));
        assert!(matches!(
            failures[0].reasons.as_slice(),
            [ConversionError::PatternNotApplicable { .. }]
        ));
        // Independent ops are still rewritten.
        assert!(m.ctx.is_erased(good));
        assert_eq!(m.kinds(), ["target.neg", "source.mystery"]);
    }

    #[test]
    fn malformed_op_stops_trying_patterns() {
        let mut m = module(&["buffer"]);
        let (a, tensor) = (m.arg(0), m.tensor);
        let op = m.push("source.reduce", &[a], tensor);

        let patterns = PatternSet::new()
            .add_buffer_rewrite_with(
                OpKind::new("source", "reduce"),
                OpKind::new("target", "reduce"),
                AttributePolicy::verbatim().require("axis", AttributeKind::Int),
            )
            .add_buffer_rewrite(OpKind::new("source", "reduce"), OpKind::new("target", "sum"));

        let err = run(&mut m, &patterns).unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].op, op);
        assert!(matches!(
            failures[0].reasons.as_slice(),
            [ConversionError::MalformedOperation { .. }]
        ));
        assert_eq!(m.kinds(), ["source.reduce"]);
    }

    struct NeverApplies;

    impl ConversionPattern for NeverApplies {
        fn root_kind(&self) -> OpKind {
            OpKind::new("source", "neg")
        }

        fn match_and_rewrite(
            &self,
            ctx: &mut IrContext,
            op: OpRef,
            rewriter: &mut PatternRewriter<'_>,
        ) -> ConversionResult<()> {
            // Leave a materialization behind before giving up.
            let operand = ctx.op_operands(op)[0];
            let buffer =
                ctx.intern_type(TypeData::buffer(ElementType::F32, &[4], Layout::ColumnMajor));
            rewriter.materialize_operand(ctx, operand, buffer)?;
            Err(ConversionError::not_applicable(self.name(), "never"))
        }

        fn name(&self) -> Cow<'static, str> {
            Cow::Borrowed("never-applies")
        }
    }

    #[test]
    fn failed_attempt_leaves_no_trace() {
        let mut m = module(&["tensor"]);
        let (a, tensor) = (m.arg(0), m.tensor);
        m.push("source.neg", &[a], tensor);

        let patterns = PatternSet::new().add(NeverApplies).add_buffer_rewrite(
            OpKind::new("source", "neg"),
            OpKind::new("target", "neg"),
        );
        let report = run(&mut m, &patterns).unwrap();

        assert_eq!(m.kinds(), ["buffer.cast", "target.neg"]);
        assert_eq!(report.materialized, 1);
        assert_eq!(m.ctx.uses(a).len(), 1);
    }

    #[test]
    fn every_failed_attempt_is_reported() {
        let mut m = module(&["tensor"]);
        let (a, tensor) = (m.arg(0), m.tensor);
        m.push("source.neg", &[a], tensor);

        let patterns = PatternSet::new().add(NeverApplies).add(NeverApplies);
        let err = run(&mut m, &patterns).unwrap_err();
        let reasons = &err.failures()[0].reasons;
        assert_eq!(reasons.len(), 2);
        assert_eq!(
            reasons[0].to_string(),
            "PatternNotApplicable: never-applies: never"
        );
        assert_eq!(m.kinds(), ["source.neg"]);
        assert_eq!(m.ctx.uses(a).len(), 1);
    }

    struct ClaimsSuccess;

    impl ConversionPattern for ClaimsSuccess {
        fn root_kind(&self) -> OpKind {
            OpKind::new("source", "neg")
        }

        fn match_and_rewrite(
            &self,
            _ctx: &mut IrContext,
            _op: OpRef,
            _rewriter: &mut PatternRewriter<'_>,
        ) -> ConversionResult<()> {
            Ok(())
        }
    }

    #[test]
    fn success_without_edit_is_an_invariant_violation() {
        let mut m = module(&["buffer"]);
        let (a, tensor) = (m.arg(0), m.tensor);
        m.push("source.neg", &[a], tensor);

        let err = run(&mut m, &PatternSet::new().add(ClaimsSuccess)).unwrap_err();
        assert!(matches!(err, LegalizeError::InvariantViolation { .. }));
    }

    /// Rewrites `source.neg` into another `source.neg`, forever.
    struct Loops;

    impl ConversionPattern for Loops {
        fn root_kind(&self) -> OpKind {
            OpKind::new("source", "neg")
        }

        fn match_and_rewrite(
            &self,
            ctx: &mut IrContext,
            op: OpRef,
            rewriter: &mut PatternRewriter<'_>,
        ) -> ConversionResult<()> {
            let location = ctx.op(op).location;
            let operands: Vec<ValueRef> = ctx.op_operands(op).to_vec();
            let results: Vec<TypeRef> = ctx.op_result_types(op).to_vec();
            let data = OperationDataBuilder::new(location, OpKind::new("source", "neg"))
                .operands(operands)
                .results(results)
                .build(ctx);
            let new_op = ctx.create_op(data);
            rewriter.replace_op(new_op);
            Ok(())
        }
    }

    #[test]
    fn rewrite_limit_aborts_runaway_patterns() {
        let mut m = module(&["buffer"]);
        let (a, tensor) = (m.arg(0), m.tensor);
        m.push("source.neg", &[a], tensor);

        let target = ConversionTarget::buffer_target();
        let converter = TypeConverter::buffer_converter(Layout::RowMajor);
        let patterns = PatternSet::new().add(Loops);
        let err = Legalizer::new(&target, &converter, &patterns)
            .with_config(LegalizeConfig::default().with_max_rewrites(5))
            .run(&mut m.ctx, m.root)
            .unwrap_err();

        assert!(matches!(err, LegalizeError::RewriteLimitExceeded { limit: 5 }));
        assert_eq!(m.kinds(), ["source.neg"]);
    }

    #[test]
    fn rewrite_limit_leaves_regions_with_their_op() {
        let mut m = module(&["buffer"]);
        let (a, tensor, buffer) = (m.arg(0), m.tensor, m.buffer);
        let (inner_block, inner) = m.block_with("buffer.inner", &[a], buffer);
        let (map, region) = m.push_with_region("source.map", &[a], tensor, inner_block);

        let target = ConversionTarget::buffer_target();
        let converter = TypeConverter::buffer_converter(Layout::RowMajor);
        let patterns = PatternSet::new()
            .add_buffer_rewrite(OpKind::new("source", "map"), OpKind::new("target", "map"));
        let err = Legalizer::new(&target, &converter, &patterns)
            .with_config(LegalizeConfig::default().with_max_rewrites(0))
            .run(&mut m.ctx, m.root)
            .unwrap_err();

        assert!(matches!(err, LegalizeError::RewriteLimitExceeded { limit: 0 }));
        assert!(!m.ctx.is_erased(map));
        assert_eq!(m.ctx.op(map).regions.as_slice(), &[region]);
        assert_eq!(m.ctx.region(region).parent_op, Some(map));
        assert!(!m.ctx.is_erased(inner));
        assert_eq!(m.block_kinds(inner_block), ["buffer.inner"]);
    }

    /// Moves the regions onto a replacement, then gives up.
    struct AdoptsThenFails;

    impl ConversionPattern for AdoptsThenFails {
        fn root_kind(&self) -> OpKind {
            OpKind::new("source", "map")
        }

        fn match_and_rewrite(
            &self,
            ctx: &mut IrContext,
            op: OpRef,
            rewriter: &mut PatternRewriter<'_>,
        ) -> ConversionResult<()> {
            let location = ctx.op(op).location;
            let regions = ctx.take_regions(op);
            let data = OperationDataBuilder::new(location, OpKind::new("target", "map"))
                .regions(regions)
                .build(ctx);
            let new_op = ctx.create_op(data);
            rewriter.replace_op(new_op);
            Err(ConversionError::not_applicable(self.name(), "operand layout unsupported"))
        }
    }

    #[test]
    fn failed_attempt_returns_adopted_regions() {
        let mut m = module(&["buffer"]);
        let (a, tensor) = (m.arg(0), m.tensor);
        let (inner_block, inner) = m.block_with("source.neg", &[a], tensor);
        let (map, region) = m.push_with_region("source.map", &[a], tensor, inner_block);

        let err = run(&mut m, &PatternSet::new().add(AdoptsThenFails)).unwrap_err();
        let failed: Vec<OpRef> = err.failures().iter().map(|f| f.op).collect();
        assert_eq!(failed, [inner, map]);
        assert_eq!(m.ctx.op(map).regions.as_slice(), &[region]);
        assert_eq!(m.ctx.region(region).parent_op, Some(map));
        assert!(!m.ctx.is_erased(inner));

        // A later pattern for the same op still finds the regions.
        let patterns = add_patterns()
            .add(AdoptsThenFails)
            .add_buffer_rewrite(OpKind::new("source", "map"), OpKind::new("target", "map"));
        run(&mut m, &patterns).unwrap();
        let new_map = m.ctx.block(m.body).ops[0];
        assert_eq!(m.ctx.op_kind(new_map), OpKind::new("target", "map"));
        assert_eq!(m.ctx.op(new_map).regions.as_slice(), &[region]);
        assert_eq!(m.block_kinds(inner_block), ["target.neg"]);
    }

    #[test]
    fn nested_block_gets_its_own_materialization() {
        // `a` is cast in the outer block first. The inner use cannot reach
        // that cast, so it gets one of its own.
        let mut m = module(&["tensor"]);
        let (a, tensor, buffer) = (m.arg(0), m.tensor, m.buffer);
        m.push("source.neg", &[a], tensor);
        let (inner_block, _) = m.block_with("source.neg", &[a], tensor);
        m.push_with_region("target.map", &[], buffer, inner_block);

        let report = run(&mut m, &add_patterns()).unwrap();

        assert_eq!(report.materialized, 2);
        assert_eq!(m.kinds(), ["buffer.cast", "target.neg", "target.map"]);
        assert_eq!(m.block_kinds(inner_block), ["buffer.cast", "target.neg"]);
        let inner_ops = m.ctx.block(inner_block).ops.clone();
        assert_eq!(m.ctx.op_operands(inner_ops[0]), &[a]);
        assert_eq!(
            m.ctx.op_operands(inner_ops[1]),
            &[m.ctx.op_result(inner_ops[0], 0)]
        );
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut m = module(&["tensor", "buffer"]);
        let (a, b, tensor) = (m.arg(0), m.arg(1), m.tensor);
        m.push("source.add", &[a, b], tensor);

        let patterns = add_patterns();
        run(&mut m, &patterns).unwrap();
        let before = printer::print_module(&m.ctx, m.root);
        let second = run(&mut m, &patterns).unwrap();

        assert_eq!(second.rewritten, 0);
        assert_eq!(second.materialized, 0);
        assert_eq!(printer::print_module(&m.ctx, m.root), before);
    }

    #[test]
    fn nested_regions_are_legalized_and_adopted() {
        let mut m = module(&["buffer"]);
        let (a, tensor, buffer) = (m.arg(0), m.tensor, m.buffer);

        let inner_block = m.ctx.create_block(BlockData {
            location: m.loc,
            args: vec![BlockArgData { ty: tensor }],
            ops: smallvec![],
            parent_region: None,
        });
        let inner_arg = m.ctx.block_arg(inner_block, 0);
        let data = OperationDataBuilder::new(m.loc, OpKind::new("source", "neg"))
            .operand(inner_arg)
            .result(tensor)
            .build(&mut m.ctx);
        let inner = m.ctx.create_op(data);
        m.ctx.push_op(inner_block, inner);
        let region = m.ctx.create_region(RegionData {
            location: m.loc,
            blocks: smallvec![inner_block],
            parent_op: None,
        });
        let data = OperationDataBuilder::new(m.loc, OpKind::new("source", "map"))
            .operand(a)
            .result(tensor)
            .attr("arity", 1i64)
            .region(region)
            .build(&mut m.ctx);
        let map = m.ctx.create_op(data);
        m.ctx.push_op(m.body, map);

        let patterns = add_patterns()
            .add_buffer_rewrite(OpKind::new("source", "map"), OpKind::new("target", "map"));
        run(&mut m, &patterns).unwrap();

        let new_map = m.ctx.block(m.body).ops[0];
        assert_eq!(m.ctx.op_kind(new_map), OpKind::new("target", "map"));
        assert_eq!(m.ctx.op_result_types(new_map), &[buffer]);
        assert_eq!(m.ctx.op(new_map).regions.as_slice(), &[region]);
        assert_eq!(m.ctx.region(region).parent_op, Some(new_map));
        assert_eq!(
            m.ctx.op(new_map).attributes.get(&Symbol::new("arity")),
            Some(&Attribute::Int(1))
        );
        let inner_kinds: Vec<String> = m
            .ctx
            .block(inner_block)
            .ops
            .iter()
            .map(|&op| m.ctx.op_kind(op).to_string())
            .collect();
        assert_eq!(inner_kinds, ["buffer.cast", "target.neg"]);
    }

    #[test]
    fn requeued_failure_can_recover() {
        // The sink sits before its producer, so it is visited first and
        // fails (tensor operand, no pattern). Rewriting the producer
        // requeues it, and it turns legal.
        let mut m = module(&["buffer"]);
        let (a, tensor, buffer) = (m.arg(0), m.tensor, m.buffer);
        let data = OperationDataBuilder::new(m.loc, OpKind::new("source", "neg"))
            .operand(a)
            .result(tensor)
            .build(&mut m.ctx);
        let neg = m.ctx.create_op(data);
        let neg_out = m.ctx.op_result(neg, 0);
        m.push("source.sink", &[neg_out], buffer);
        m.ctx.push_op(m.body, neg);

        let report = run(&mut m, &add_patterns()).unwrap();
        assert_eq!(report.rewritten, 1);
        assert_eq!(report.visited, 4);
        assert_eq!(m.kinds(), ["source.sink", "target.neg"]);
    }
}
