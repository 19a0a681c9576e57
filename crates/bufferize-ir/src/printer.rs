//! Text form of the operation graph.
//!
//! ```text
//! core.module @demo {
//!   func.func {sym_name = @add} {
//!     ^bb0(%0: tensor<4xf32>, %1: tensor<4xf32>):
//!       %2 = buffer.cast %0 : buffer<4xf32,rowmajor>
//!       %3 = buffer.cast %1 : buffer<4xf32,rowmajor>
//!       %4 = target.add %2, %3 : buffer<4xf32,rowmajor>
//!       func.return %4
//!   }
//! }
//! ```
//!
//! Used for diagnostics and test snapshots; there is no parser for it.

use std::collections::HashMap;
use std::fmt::{self, Write};

use crate::context::IrContext;
use crate::refs::*;
use crate::symbol::Symbol;
use crate::types::*;

struct PrintState<'a> {
    ctx: &'a IrContext,
    value_names: HashMap<ValueRef, String>,
    next_value: usize,
    next_block: usize,
}

impl<'a> PrintState<'a> {
    fn new(ctx: &'a IrContext) -> Self {
        Self {
            ctx,
            value_names: HashMap::new(),
            next_value: 0,
            next_block: 0,
        }
    }

    fn define(&mut self, v: ValueRef) -> String {
        let name = format!("%{}", self.next_value);
        self.next_value += 1;
        self.value_names.insert(v, name.clone());
        name
    }

    fn name_of(&self, v: ValueRef) -> &str {
        self.value_names.get(&v).map(String::as_str).unwrap_or("%?")
    }

    fn reset(&mut self) {
        self.value_names.clear();
        self.next_value = 0;
        self.next_block = 0;
    }
}

pub fn print_op(ctx: &IrContext, op: OpRef) -> String {
    let mut state = PrintState::new(ctx);
    let mut out = String::new();
    print_operation(&mut state, &mut out, op, 0).expect("fmt::Write to String never fails");
    out
}

pub fn print_type(ctx: &IrContext, ty: TypeRef) -> String {
    let mut out = String::new();
    write_type(ctx, &mut out, ty).expect("fmt::Write to String never fails");
    out
}

/// Print a `core.module`; numbering restarts for each top-level op.
pub fn print_module(ctx: &IrContext, root: OpRef) -> String {
    let mut state = PrintState::new(ctx);
    let mut out = String::new();
    print_module_op(&mut state, &mut out, root).expect("fmt::Write to String never fails");
    out
}

// ============================================================================
// Types and attributes
// ============================================================================

fn write_dims(f: &mut impl Write, shape: &[Dim]) -> fmt::Result {
    for dim in shape {
        write!(f, "{dim}x")?;
    }
    Ok(())
}

fn write_type(ctx: &IrContext, f: &mut impl Write, ty: TypeRef) -> fmt::Result {
    match ctx.types.get(ty) {
        TypeData::Element(element) => write!(f, "{element}"),
        TypeData::Tensor { element, shape } => {
            f.write_str("tensor<")?;
            match shape {
                Some(shape) => write_dims(f, shape)?,
                None => f.write_str("*x")?,
            }
            write!(f, "{element}>")
        }
        TypeData::Buffer {
            element,
            shape,
            layout,
        } => {
            f.write_str("buffer<")?;
            write_dims(f, shape)?;
            write!(f, "{element},{layout}>")
        }
        TypeData::Opaque {
            dialect,
            name,
            params,
        } => {
            let params: Vec<String> = params.iter().map(|&p| print_type(ctx, p)).collect();
            if let Some(hook) = ctx.registry.opaque_printer(*dialect, *name) {
                return f.write_str(&hook(&params));
            }
            write!(f, "!{dialect}.{name}")?;
            if !params.is_empty() {
                write!(f, "<{}>", params.join(", "))?;
            }
            Ok(())
        }
    }
}

fn write_attribute(ctx: &IrContext, f: &mut impl Write, attr: &Attribute) -> fmt::Result {
    match attr {
        Attribute::Unit => f.write_str("unit"),
        Attribute::Bool(b) => write!(f, "{b}"),
        Attribute::Int(v) => write!(f, "{v}"),
        Attribute::FloatBits(bits) => {
            let v = f64::from_bits(*bits);
            let s = v.to_string();
            f.write_str(&s)?;
            if v.is_finite() && !s.contains(['.', 'e', 'E']) {
                f.write_str(".0")?;
            }
            Ok(())
        }
        Attribute::String(s) => write!(f, "{s:?}"),
        Attribute::Type(ty) => write_type(ctx, f, *ty),
        Attribute::Symbol(sym) => write_symbol(f, *sym),
        Attribute::List(items) => {
            f.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_attribute(ctx, f, item)?;
            }
            f.write_char(']')
        }
    }
}

fn write_symbol(f: &mut impl Write, sym: Symbol) -> fmt::Result {
    sym.with_str(|s| {
        if !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_') {
            write!(f, "@{s}")
        } else {
            write!(f, "@{s:?}")
        }
    })
}

// ============================================================================
// Operations
// ============================================================================

fn print_operation(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    op: OpRef,
    indent: usize,
) -> fmt::Result {
    let kind = state.ctx.op_kind(op);
    if kind.dialect == "core" && kind.name == "module" {
        return print_module_op(state, f, op);
    }

    let ctx = state.ctx;
    let pad = " ".repeat(indent);
    f.write_str(&pad)?;

    let results = ctx.op_results(op);
    if !results.is_empty() {
        let names: Vec<String> = results.iter().map(|&v| state.define(v)).collect();
        write!(f, "{} = ", names.join(", "))?;
    }

    write!(f, "{kind}")?;

    let operands = ctx.op_operands(op);
    for (i, &v) in operands.iter().enumerate() {
        f.write_str(if i == 0 { " " } else { ", " })?;
        f.write_str(state.name_of(v))?;
    }

    let attrs = &ctx.op(op).attributes;
    if !attrs.is_empty() {
        f.write_str(" {")?;
        for (i, (key, val)) in attrs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key} = ")?;
            write_attribute(ctx, f, val)?;
        }
        f.write_char('}')?;
    }

    let result_types = ctx.op_result_types(op);
    if !result_types.is_empty() {
        f.write_str(" : ")?;
        for (i, &ty) in result_types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_type(ctx, f, ty)?;
        }
    }

    for &region in &ctx.op(op).regions {
        f.write_str(" {\n")?;
        print_region(state, f, region, indent + 2)?;
        write!(f, "{pad}}}")?;
    }

    f.write_char('\n')
}

fn print_region(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    region: RegionRef,
    indent: usize,
) -> fmt::Result {
    let ctx = state.ctx;
    let blocks = &ctx.region(region).blocks;
    let elide_label = blocks.len() == 1 && ctx.block_args(blocks[0]).is_empty();
    let pad = " ".repeat(indent);

    for &block in blocks {
        let body_indent = if elide_label { indent } else { indent + 2 };
        if !elide_label {
            write!(f, "{pad}^bb{}", state.next_block)?;
            state.next_block += 1;
            let args = ctx.block_args(block);
            if !args.is_empty() {
                f.write_char('(')?;
                for (i, &arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    let name = state.define(arg);
                    write!(f, "{name}: ")?;
                    write_type(ctx, f, ctx.value_ty(arg))?;
                }
                f.write_char(')')?;
            }
            f.write_str(":\n")?;
        }
        for &op in &ctx.block(block).ops {
            print_operation(state, f, op, body_indent)?;
        }
    }
    Ok(())
}

fn print_module_op(state: &mut PrintState<'_>, f: &mut impl Write, op: OpRef) -> fmt::Result {
    let ctx = state.ctx;
    let data = ctx.op(op);
    f.write_str("core.module")?;
    if let Some(Attribute::Symbol(name)) = data.attributes.get(&Symbol::new("sym_name")) {
        f.write_char(' ')?;
        write_symbol(f, *name)?;
    }
    f.write_str(" {\n")?;
    for &region in &data.regions {
        for &block in &ctx.region(region).blocks {
            for &child in &ctx.block(block).ops {
                state.reset();
                print_operation(state, f, child, 2)?;
            }
        }
    }
    f.write_str("}\n")
}
