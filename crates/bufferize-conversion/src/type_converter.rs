//! Type conversion policy and boundary materialization.

use std::collections::HashMap;

use bufferize_ir::{
    IrContext, Layout, Location, OpRef, OperationDataBuilder, TypeData, TypeRef, ValueRef,
};

use crate::error::{ConversionError, ConversionResult};
use crate::names;

/// Value produced by a materialization plus the detached ops that compute it.
///
/// The ops are not attached to any block; the rewriter inserts them in
/// order immediately before the operation being rewritten.
pub struct MaterializeResult {
    pub value: ValueRef,
    pub ops: Vec<OpRef>,
}

type ConversionFn = dyn Fn(&mut IrContext, TypeRef) -> Option<TypeRef>;

type MaterializerFn = dyn Fn(&mut IrContext, Location, ValueRef, TypeRef) -> Option<MaterializeResult>;

/// Maps source-representation types to target-representation types.
///
/// Lookups consult the explicit mapping table first, then each conversion
/// rule in registration order. Types that are not in source representation
/// and have no mapping convert to themselves.
#[derive(Default)]
pub struct TypeConverter {
    mappings: HashMap<TypeRef, TypeRef>,
    conversions: Vec<Box<ConversionFn>>,
    materializer: Option<Box<MaterializerFn>>,
}

impl TypeConverter {
    /// A converter with no mappings, no rules and no materializer. Source
    /// types are unsupported until something maps them.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stock tensor-to-buffer converter.
    ///
    /// Every ranked tensor maps to a buffer with the same element type and
    /// shape in `layout`; unranked tensors have no mapping. Boundaries are
    /// materialized with one `buffer.cast` per value.
    pub fn buffer_converter(layout: Layout) -> Self {
        let mut converter = Self::new();
        converter.add_conversion(move |ctx, ty| {
            let TypeData::Tensor {
                element,
                shape: Some(shape),
            } = ctx.types.get(ty).clone()
            else {
                return None;
            };
            Some(ctx.intern_type(TypeData::Buffer {
                element,
                shape,
                layout,
            }))
        });
        converter.set_materializer(cast_materializer);
        converter
    }

    /// Add an exact `src -> dst` entry. Later entries for the same `src` win.
    pub fn add_mapping(&mut self, src: TypeRef, dst: TypeRef) {
        self.mappings.insert(src, dst);
    }

    /// Add a conversion rule. Rules run after the mapping table, in
    /// registration order; the first `Some` wins.
    pub fn add_conversion(
        &mut self,
        f: impl Fn(&mut IrContext, TypeRef) -> Option<TypeRef> + 'static,
    ) {
        self.conversions.push(Box::new(f));
    }

    /// Install the hook that builds boundary ops. Without one, or when it
    /// returns `None`, materialization fails with `UnsupportedType`.
    pub fn set_materializer(
        &mut self,
        f: impl Fn(&mut IrContext, Location, ValueRef, TypeRef) -> Option<MaterializeResult> + 'static,
    ) {
        self.materializer = Some(Box::new(f));
    }

    /// Convert `ty`, failing with `UnsupportedType` for an unmapped source type.
    pub fn convert_type(&self, ctx: &mut IrContext, ty: TypeRef) -> ConversionResult<TypeRef> {
        if let Some(&mapped) = self.mappings.get(&ty) {
            return Ok(mapped);
        }
        for conv in &self.conversions {
            if let Some(converted) = conv(ctx, ty) {
                return Ok(converted);
            }
        }
        if ctx.types.is_source(ty) {
            return Err(ConversionError::unsupported_type(ctx, ty));
        }
        Ok(ty)
    }

    /// Build the ops that turn `value` into a value of type `to_ty`.
    ///
    /// Nothing is inserted into the graph here.
    pub fn materialize(
        &self,
        ctx: &mut IrContext,
        location: Location,
        value: ValueRef,
        to_ty: TypeRef,
    ) -> ConversionResult<MaterializeResult> {
        let Some(materializer) = &self.materializer else {
            return Err(ConversionError::unsupported_type(ctx, ctx.value_ty(value)));
        };
        match materializer(ctx, location, value, to_ty) {
            Some(result) => Ok(result),
            None => Err(ConversionError::unsupported_type(ctx, ctx.value_ty(value))),
        }
    }
}

/// Stock materializer: a single `buffer.cast` producing `to_ty`.
pub fn cast_materializer(
    ctx: &mut IrContext,
    location: Location,
    value: ValueRef,
    to_ty: TypeRef,
) -> Option<MaterializeResult> {
    let data = OperationDataBuilder::new(location, names::buffer_cast())
        .operand(value)
        .result(to_ty)
        .build(ctx);
    let cast = ctx.create_op(data);
    Some(MaterializeResult {
        value: ctx.op_result(cast, 0),
        ops: vec![cast],
    })
}
