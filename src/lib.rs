//! Tensor-to-buffer legalization.
//!
//! Re-exports the operation graph ([`ir`]) and the conversion engine
//! ([`conversion`]). The usual flow is: build a graph in an
//! [`IrContext`](ir::IrContext), pick a [`ConversionTarget`], a
//! [`TypeConverter`] and a [`PatternSet`], then call [`legalize`].
//!
//! ```
//! use bufferize::conversion::{ConversionTarget, PatternSet, TypeConverter, legalize};
//! use bufferize::ir::smallvec::smallvec;
//! use bufferize::ir::*;
//!
//! let mut ctx = IrContext::new();
//! let path = ctx.paths.intern("add.mlir");
//! let loc = Location::new(path, Span::new(0, 0));
//! let tensor = ctx.intern_type(TypeData::tensor(ElementType::F32, &[4]));
//!
//! let body = ctx.create_block(BlockData {
//!     location: loc,
//!     args: vec![BlockArgData { ty: tensor }, BlockArgData { ty: tensor }],
//!     ops: smallvec![],
//!     parent_region: None,
//! });
//! let (a, b) = (ctx.block_arg(body, 0), ctx.block_arg(body, 1));
//! let data = OperationDataBuilder::new(loc, OpKind::new("source", "add"))
//!     .operands([a, b])
//!     .result(tensor)
//!     .build(&mut ctx);
//! let add = ctx.create_op(data);
//! ctx.push_op(body, add);
//! let region = ctx.create_region(RegionData { location: loc, blocks: smallvec![body], parent_op: None });
//! let data = OperationDataBuilder::new(loc, OpKind::new("core", "module"))
//!     .region(region)
//!     .build(&mut ctx);
//! let module = ctx.create_op(data);
//!
//! let patterns = PatternSet::new()
//!     .add_buffer_rewrite(OpKind::new("source", "add"), OpKind::new("target", "add"));
//! let report = legalize(
//!     &mut ctx,
//!     module,
//!     &ConversionTarget::buffer_target(),
//!     &TypeConverter::buffer_converter(Layout::RowMajor),
//!     &patterns,
//! )
//! .unwrap();
//! assert_eq!(report.materialized, 2);
//! ```

pub use bufferize_conversion as conversion;
pub use bufferize_ir as ir;

pub use bufferize_conversion::{
    ConversionError, ConversionTarget, LegalizeConfig, LegalizeError, LegalizeReport, Legalizer,
    PatternSet, TypeConverter, legalize,
};
