//! Graph construction helpers shared by the integration tests.

#![allow(dead_code)]

use bufferize::ir::smallvec::smallvec;
use bufferize::ir::*;

/// Builds a `core.module @test` holding one `func.func @main` whose entry
/// block is filled op by op.
pub struct GraphBuilder {
    pub ctx: IrContext,
    pub loc: Location,
    pub entry: BlockRef,
}

impl GraphBuilder {
    /// `args` become the entry block arguments.
    pub fn new(args: &[TypeData]) -> Self {
        let mut ctx = IrContext::new();
        let path = ctx.paths.intern("test.mlir");
        let loc = Location::new(path, Span::new(0, 0));
        let args = args
            .iter()
            .map(|data| BlockArgData {
                ty: ctx.intern_type(data.clone()),
            })
            .collect();
        let entry = ctx.create_block(BlockData {
            location: loc,
            args,
            ops: smallvec![],
            parent_region: None,
        });
        Self { ctx, loc, entry }
    }

    pub fn arg(&self, index: u32) -> ValueRef {
        self.ctx.block_arg(self.entry, index)
    }

    pub fn ty(&mut self, data: TypeData) -> TypeRef {
        self.ctx.intern_type(data)
    }

    /// Append `kind` to the entry block and return its first result, if any.
    pub fn op(
        &mut self,
        kind: &str,
        operands: &[ValueRef],
        results: &[TypeData],
    ) -> Option<ValueRef> {
        self.op_with(kind, operands, results, &[])
    }

    pub fn op_with(
        &mut self,
        kind: &str,
        operands: &[ValueRef],
        results: &[TypeData],
        attrs: &[(&'static str, Attribute)],
    ) -> Option<ValueRef> {
        let kind = OpKind::parse(kind).expect("kind must be `dialect.name`");
        let results: Vec<TypeRef> = results.iter().map(|r| self.ty(r.clone())).collect();
        let mut builder = OperationDataBuilder::new(self.loc, kind)
            .operands(operands.iter().copied())
            .results(results);
        for (key, value) in attrs {
            builder = builder.attr(*key, value.clone());
        }
        let data = builder.build(&mut self.ctx);
        let op = self.ctx.create_op(data);
        self.ctx.push_op(self.entry, op);
        self.ctx.op_results(op).first().copied()
    }

    /// Wrap the entry block into the function and module; returns the module.
    pub fn finish(mut self) -> Graph {
        let body = self.ctx.create_region(RegionData {
            location: self.loc,
            blocks: smallvec![self.entry],
            parent_op: None,
        });
        let func = OperationDataBuilder::new(self.loc, OpKind::new("func", "func"))
            .attr("sym_name", Symbol::new("main"))
            .region(body)
            .build(&mut self.ctx);
        let func = self.ctx.create_op(func);

        let module_block = self.ctx.create_block(BlockData {
            location: self.loc,
            args: vec![],
            ops: smallvec![],
            parent_region: None,
        });
        self.ctx.push_op(module_block, func);
        let module_region = self.ctx.create_region(RegionData {
            location: self.loc,
            blocks: smallvec![module_block],
            parent_op: None,
        });
        let module = OperationDataBuilder::new(self.loc, OpKind::new("core", "module"))
            .attr("sym_name", Symbol::new("test"))
            .region(module_region)
            .build(&mut self.ctx);
        let module = self.ctx.create_op(module);

        Graph {
            ctx: self.ctx,
            module,
            entry: self.entry,
        }
    }
}

pub struct Graph {
    pub ctx: IrContext,
    pub module: OpRef,
    pub entry: BlockRef,
}

impl Graph {
    pub fn print(&self) -> String {
        printer::print_module(&self.ctx, self.module)
    }

    pub fn entry_ops(&self) -> Vec<OpRef> {
        self.ctx.block(self.entry).ops.to_vec()
    }

    /// `kind(operands..)`, spelling each operand by its producer, or `argN`
    /// for a block argument. Independent of op and value numbering.
    pub fn describe_op(&self, op: OpRef) -> String {
        let operands: Vec<String> = self
            .ctx
            .op_operands(op)
            .iter()
            .map(|&v| self.describe_value(v))
            .collect();
        format!("{}({})", self.ctx.op_kind(op), operands.join(", "))
    }

    pub fn describe_value(&self, value: ValueRef) -> String {
        match self.ctx.value_def(value) {
            ValueDef::OpResult(op, _) => self.describe_op(op),
            ValueDef::BlockArg(_, index) => format!("arg{index}"),
        }
    }
}

pub fn tensor4() -> TypeData {
    TypeData::tensor(ElementType::F32, &[4])
}

pub fn buffer4() -> TypeData {
    TypeData::buffer(ElementType::F32, &[4], Layout::RowMajor)
}
