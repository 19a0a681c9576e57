//! Session-scoped dialect registry.
//!
//! Each [`IrContext`](crate::IrContext) owns one registry. Opaque types are
//! registered explicitly after the context is created and go away with it;
//! nothing here is process-wide.

use std::collections::HashMap;

use crate::symbol::Symbol;

/// Renders an opaque type given its already-printed type parameters.
pub type OpaquePrintFn = dyn Fn(&[String]) -> String;

#[derive(Default)]
pub struct DialectRegistry {
    opaque_printers: HashMap<(Symbol, Symbol), Box<OpaquePrintFn>>,
}

impl DialectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an opaque type and the hook that prints it. A later
    /// registration for the same type replaces the hook.
    pub fn register_opaque_type(
        &mut self,
        dialect: &str,
        name: &str,
        print: impl Fn(&[String]) -> String + 'static,
    ) {
        let key = (Symbol::from_dynamic(dialect), Symbol::from_dynamic(name));
        self.opaque_printers.insert(key, Box::new(print));
    }

    pub fn opaque_printer(&self, dialect: Symbol, name: Symbol) -> Option<&OpaquePrintFn> {
        self.opaque_printers
            .get(&(dialect, name))
            .map(|hook| hook.as_ref())
    }

    /// Drop every registration, returning the registry to its initial state.
    pub fn clear(&mut self) {
        self.opaque_printers.clear();
    }
}
