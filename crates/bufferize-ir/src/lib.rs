//! Arena-based operation graph used by the bufferize conversion engine.
//!
//! All IR entities live in `cranelift-entity` maps owned by [`IrContext`].
//! Handles (`OpRef`, `ValueRef`, ...) are plain `u32` indices, so they stay
//! valid across insertion and erasure and can be queued freely.

pub mod context;
pub mod printer;
pub mod refs;
pub mod registry;
pub mod symbol;
pub mod types;
pub mod walk;

pub use context::{
    BlockArgData, BlockData, IrContext, OperationData, OperationDataBuilder, RegionData, Use,
    ValueData,
};
pub use refs::{BlockRef, OpRef, PathRef, RegionRef, TypeRef, ValueDef, ValueRef};
pub use registry::{DialectRegistry, OpaquePrintFn};
pub use symbol::{OpKind, Symbol};
pub use types::{
    Attribute, AttributeKind, Dim, ElementType, Layout, Location, PathInterner, Representation,
    Shape, Span, TypeData, TypeInterner,
};
pub use walk::WalkAction;

pub use smallvec;
