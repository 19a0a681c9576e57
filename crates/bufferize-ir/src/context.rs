//! IrContext: arena storage for the operation graph.
//!
//! Operations, values, blocks and regions live in `PrimaryMap`s. Operand and
//! result lists are `EntityList`s backed by shared pools, and every operand
//! is mirrored in a per-value use-chain so RAUW is proportional to the
//! number of uses.

use std::collections::BTreeMap;

use cranelift_entity::{EntityList, ListPool, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

use crate::refs::*;
use crate::registry::DialectRegistry;
use crate::symbol::{OpKind, Symbol};
use crate::types::*;

/// One operand slot that reads a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Use {
    pub user: OpRef,
    pub operand_index: u32,
}

pub struct OperationData {
    pub location: Location,
    pub kind: OpKind,
    pub operands: EntityList<ValueRef>,
    pub results: EntityList<TypeRef>,
    pub attributes: BTreeMap<Symbol, Attribute>,
    pub regions: SmallVec<[RegionRef; 2]>,
    pub parent_block: Option<BlockRef>,
}

pub struct ValueData {
    pub def: ValueDef,
    pub ty: TypeRef,
}

#[derive(Clone, Debug)]
pub struct BlockArgData {
    pub ty: TypeRef,
}

pub struct BlockData {
    pub location: Location,
    pub args: Vec<BlockArgData>,
    pub ops: SmallVec<[OpRef; 8]>,
    pub parent_region: Option<RegionRef>,
}

pub struct RegionData {
    pub location: Location,
    pub blocks: SmallVec<[BlockRef; 2]>,
    pub parent_op: Option<OpRef>,
}

/// Owns one operation graph plus its type tables and dialect registry.
///
/// A context is one compilation session: the registry is initialised by
/// explicit registration calls and torn down when the context is dropped.
pub struct IrContext {
    ops: PrimaryMap<OpRef, OperationData>,
    values: PrimaryMap<ValueRef, ValueData>,
    blocks: PrimaryMap<BlockRef, BlockData>,
    regions: PrimaryMap<RegionRef, RegionData>,

    uses: SecondaryMap<ValueRef, SmallVec<[Use; 2]>>,
    erased: SecondaryMap<OpRef, bool>,

    pub types: TypeInterner,
    pub paths: PathInterner,
    pub registry: DialectRegistry,

    value_pool: ListPool<ValueRef>,
    type_pool: ListPool<TypeRef>,

    result_values: SecondaryMap<OpRef, EntityList<ValueRef>>,
    block_arg_values: SecondaryMap<BlockRef, EntityList<ValueRef>>,
}

impl IrContext {
    pub fn new() -> Self {
        Self::with_registry(DialectRegistry::new())
    }

    pub fn with_registry(registry: DialectRegistry) -> Self {
        Self {
            ops: PrimaryMap::new(),
            values: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            regions: PrimaryMap::new(),
            uses: SecondaryMap::new(),
            erased: SecondaryMap::new(),
            types: TypeInterner::new(),
            paths: PathInterner::new(),
            registry,
            value_pool: ListPool::new(),
            type_pool: ListPool::new(),
            result_values: SecondaryMap::new(),
            block_arg_values: SecondaryMap::new(),
        }
    }

    /// Shorthand for `ctx.types.intern(data)`.
    pub fn intern_type(&mut self, data: TypeData) -> TypeRef {
        self.types.intern(data)
    }

    // ========================================================================
    // Operation
    // ========================================================================

    /// Create a detached operation and allocate its result values.
    ///
    /// Operand uses are registered immediately; regions are back-linked to
    /// the new op.
    ///
    /// # Panics
    ///
    /// Panics if `data.parent_block` is set or a region already has an owner.
    pub fn create_op(&mut self, data: OperationData) -> OpRef {
        assert!(
            data.parent_block.is_none(),
            "create_op: operation must not have parent_block set; attach it with push_op",
        );

        let operands: SmallVec<[ValueRef; 8]> = data.operands.as_slice(&self.value_pool).into();
        let result_types: SmallVec<[TypeRef; 4]> = data.results.as_slice(&self.type_pool).into();
        let regions = data.regions.clone();

        let op = self.ops.push(data);

        for &r in &regions {
            if let Some(owner) = self.regions[r].parent_op {
                panic!("create_op: region {r} already belongs to {owner}; cannot give it to {op}");
            }
            self.regions[r].parent_op = Some(op);
        }

        for (idx, &val) in operands.iter().enumerate() {
            self.uses[val].push(Use {
                user: op,
                operand_index: idx as u32,
            });
        }

        let mut results = EntityList::new();
        for (idx, &ty) in result_types.iter().enumerate() {
            let v = self.values.push(ValueData {
                def: ValueDef::OpResult(op, idx as u32),
                ty,
            });
            results.push(v, &mut self.value_pool);
        }
        self.result_values[op] = results;

        op
    }

    pub fn op(&self, op: OpRef) -> &OperationData {
        &self.ops[op]
    }

    pub fn op_kind(&self, op: OpRef) -> OpKind {
        self.ops[op].kind
    }

    pub fn op_operands(&self, op: OpRef) -> &[ValueRef] {
        self.ops[op].operands.as_slice(&self.value_pool)
    }

    pub fn op_result_types(&self, op: OpRef) -> &[TypeRef] {
        self.ops[op].results.as_slice(&self.type_pool)
    }

    pub fn op_result(&self, op: OpRef, index: u32) -> ValueRef {
        self.result_values[op].as_slice(&self.value_pool)[index as usize]
    }

    pub fn op_results(&self, op: OpRef) -> &[ValueRef] {
        self.result_values[op].as_slice(&self.value_pool)
    }

    /// Index of `op` within its parent block.
    pub fn op_position(&self, op: OpRef) -> Option<usize> {
        let block = self.ops[op].parent_block?;
        self.blocks[block].ops.iter().position(|&o| o == op)
    }

    pub fn is_erased(&self, op: OpRef) -> bool {
        self.erased[op]
    }

    /// Destroy a detached operation, dropping its operand uses.
    ///
    /// Operations nested in its regions are destroyed with it.
    ///
    /// # Panics
    ///
    /// Panics if the op is still attached to a block or any of its results
    /// still has uses.
    pub fn remove_op(&mut self, op: OpRef) {
        assert!(
            self.ops[op].parent_block.is_none(),
            "remove_op: {op} is still attached to a block; call remove_op_from_block first",
        );
        let results: SmallVec<[ValueRef; 4]> = self.op_results(op).into();
        for &val in &results {
            assert!(
                self.uses[val].is_empty(),
                "remove_op: result {val} of {op} still has {} use(s)",
                self.uses[val].len()
            );
        }
        self.destroy(op);
    }

    fn destroy(&mut self, op: OpRef) {
        let regions = self.ops[op].regions.clone();
        for region in regions {
            let blocks = self.regions[region].blocks.clone();
            for block in blocks {
                let nested = self.blocks[block].ops.clone();
                for inner in nested.into_iter().rev() {
                    self.destroy(inner);
                }
            }
        }
        let operands: SmallVec<[ValueRef; 8]> = self.op_operands(op).into();
        for (idx, &val) in operands.iter().enumerate() {
            self.uses[val].retain(|u| !(u.user == op && u.operand_index == idx as u32));
        }
        self.erased[op] = true;
    }

    /// Detach `op` from its block and destroy it.
    pub fn erase_op(&mut self, op: OpRef) {
        if let Some(block) = self.ops[op].parent_block {
            self.remove_op_from_block(block, op);
        }
        self.remove_op(op);
    }

    /// Detach every region from `op` so another operation can adopt them.
    pub fn take_regions(&mut self, op: OpRef) -> SmallVec<[RegionRef; 2]> {
        let regions = std::mem::take(&mut self.ops[op].regions);
        for &r in &regions {
            self.regions[r].parent_op = None;
        }
        regions
    }

    /// Append detached regions to `op`, typically handing back regions
    /// taken by [`take_regions`](Self::take_regions).
    ///
    /// # Panics
    ///
    /// Panics if a region still has an owner.
    pub fn adopt_regions(&mut self, op: OpRef, regions: impl IntoIterator<Item = RegionRef>) {
        for r in regions {
            if let Some(owner) = self.regions[r].parent_op {
                panic!("adopt_regions: region {r} already belongs to {owner}; cannot give it to {op}");
            }
            self.regions[r].parent_op = Some(op);
            self.ops[op].regions.push(r);
        }
    }

    // ========================================================================
    // Value
    // ========================================================================

    pub fn value_ty(&self, v: ValueRef) -> TypeRef {
        self.values[v].ty
    }

    pub fn value_def(&self, v: ValueRef) -> ValueDef {
        self.values[v].def
    }

    // ========================================================================
    // Block
    // ========================================================================

    pub fn create_block(&mut self, data: BlockData) -> BlockRef {
        let arg_types: SmallVec<[TypeRef; 4]> = data.args.iter().map(|a| a.ty).collect();
        let block = self.blocks.push(data);

        let mut args = EntityList::new();
        for (idx, ty) in arg_types.into_iter().enumerate() {
            let v = self.values.push(ValueData {
                def: ValueDef::BlockArg(block, idx as u32),
                ty,
            });
            args.push(v, &mut self.value_pool);
        }
        self.block_arg_values[block] = args;

        block
    }

    pub fn block(&self, b: BlockRef) -> &BlockData {
        &self.blocks[b]
    }

    pub fn block_arg(&self, b: BlockRef, index: u32) -> ValueRef {
        self.block_arg_values[b].as_slice(&self.value_pool)[index as usize]
    }

    pub fn block_args(&self, b: BlockRef) -> &[ValueRef] {
        self.block_arg_values[b].as_slice(&self.value_pool)
    }

    /// Append `op` to the end of `block`.
    ///
    /// # Panics
    ///
    /// Panics if `op` already belongs to a block.
    pub fn push_op(&mut self, block: BlockRef, op: OpRef) {
        assert!(
            self.ops[op].parent_block.is_none(),
            "push_op: {op} already belongs to a block",
        );
        self.ops[op].parent_block = Some(block);
        self.blocks[block].ops.push(op);
    }

    /// Insert `op` immediately before `before` in `block`.
    ///
    /// # Panics
    ///
    /// Panics if `op` already belongs to a block or `before` is not in `block`.
    pub fn insert_op_before(&mut self, block: BlockRef, before: OpRef, op: OpRef) {
        assert!(
            self.ops[op].parent_block.is_none(),
            "insert_op_before: {op} already belongs to a block",
        );
        let ops = &mut self.blocks[block].ops;
        let pos = ops
            .iter()
            .position(|&o| o == before)
            .unwrap_or_else(|| panic!("insert_op_before: {before} is not in {block}"));
        ops.insert(pos, op);
        self.ops[op].parent_block = Some(block);
    }

    /// Detach `op` from `block` without destroying it.
    pub fn remove_op_from_block(&mut self, block: BlockRef, op: OpRef) {
        self.blocks[block].ops.retain(|o| *o != op);
        if self.ops[op].parent_block == Some(block) {
            self.ops[op].parent_block = None;
        }
    }

    // ========================================================================
    // Region
    // ========================================================================

    /// # Panics
    ///
    /// Panics if a block in `data.blocks` already belongs to a region.
    pub fn create_region(&mut self, data: RegionData) -> RegionRef {
        let blocks = data.blocks.clone();
        let region = self.regions.push(data);
        for b in blocks {
            if let Some(owner) = self.blocks[b].parent_region {
                panic!("create_region: {b} already belongs to {owner}; cannot move it to {region}");
            }
            self.blocks[b].parent_region = Some(region);
        }
        region
    }

    pub fn region(&self, r: RegionRef) -> &RegionData {
        &self.regions[r]
    }

    // ========================================================================
    // Use-chain
    // ========================================================================

    pub fn uses(&self, v: ValueRef) -> &[Use] {
        &self.uses[v]
    }

    pub fn has_uses(&self, v: ValueRef) -> bool {
        !self.uses[v].is_empty()
    }

    /// Redirect every use of `old` to `new`, keeping both use-chains exact.
    pub fn replace_all_uses(&mut self, old: ValueRef, new: ValueRef) {
        if old == new {
            return;
        }
        let old_uses = std::mem::take(&mut self.uses[old]);
        for u in old_uses {
            let slice = self.ops[u.user].operands.as_mut_slice(&mut self.value_pool);
            debug_assert_eq!(slice[u.operand_index as usize], old);
            slice[u.operand_index as usize] = new;
            self.uses[new].push(u);
        }
    }
}

impl Default for IrContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent constructor for [`OperationData`].
///
/// Operands and result types are collected in `Vec`s and packed into the
/// context's pools by [`build`](Self::build).
pub struct OperationDataBuilder {
    location: Location,
    kind: OpKind,
    operands: Vec<ValueRef>,
    results: Vec<TypeRef>,
    attributes: BTreeMap<Symbol, Attribute>,
    regions: SmallVec<[RegionRef; 2]>,
}

impl OperationDataBuilder {
    pub fn new(location: Location, kind: OpKind) -> Self {
        Self {
            location,
            kind,
            operands: Vec::new(),
            results: Vec::new(),
            attributes: BTreeMap::new(),
            regions: SmallVec::new(),
        }
    }

    pub fn operand(mut self, v: ValueRef) -> Self {
        self.operands.push(v);
        self
    }

    pub fn operands(mut self, vs: impl IntoIterator<Item = ValueRef>) -> Self {
        self.operands.extend(vs);
        self
    }

    pub fn result(mut self, ty: TypeRef) -> Self {
        self.results.push(ty);
        self
    }

    pub fn results(mut self, tys: impl IntoIterator<Item = TypeRef>) -> Self {
        self.results.extend(tys);
        self
    }

    pub fn attr(mut self, key: impl Into<Symbol>, val: impl Into<Attribute>) -> Self {
        self.attributes.insert(key.into(), val.into());
        self
    }

    pub fn attrs(mut self, attrs: BTreeMap<Symbol, Attribute>) -> Self {
        self.attributes.extend(attrs);
        self
    }

    pub fn region(mut self, r: RegionRef) -> Self {
        self.regions.push(r);
        self
    }

    pub fn regions(mut self, rs: impl IntoIterator<Item = RegionRef>) -> Self {
        self.regions.extend(rs);
        self
    }

    pub fn build(self, ctx: &mut IrContext) -> OperationData {
        let mut operands = EntityList::new();
        for v in self.operands {
            operands.push(v, &mut ctx.value_pool);
        }
        let mut results = EntityList::new();
        for ty in self.results {
            results.push(ty, &mut ctx.type_pool);
        }
        OperationData {
            location: self.location,
            kind: self.kind,
            operands,
            results,
            attributes: self.attributes,
            regions: self.regions,
            parent_block: None,
        }
    }
}
