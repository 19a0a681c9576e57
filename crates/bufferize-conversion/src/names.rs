//! Well-known dialect and op names.

use bufferize_ir::{OpKind, symbols};

symbols! {
    CORE => "core",
    FUNC => "func",
    BUFFER => "buffer",
    TARGET => "target",
    MODULE => "module",
    CAST => "cast",
}

/// `buffer.cast`: the stock materialization op.
pub fn buffer_cast() -> OpKind {
    OpKind::new(BUFFER(), CAST())
}

pub fn core_module() -> OpKind {
    OpKind::new(CORE(), MODULE())
}

pub fn func_func() -> OpKind {
    OpKind::new(FUNC(), FUNC())
}
