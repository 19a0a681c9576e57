//! Interned names and operation kinds.

use std::fmt;
use std::sync::LazyLock;

use lasso::{Rodeo, Spur};
use parking_lot::RwLock;

/// String table shared by every [`Symbol`].
///
/// Symbols are plain names, not dialect registrations; dialect-level state
/// lives in the per-session [`DialectRegistry`](crate::DialectRegistry).
static INTERNER: LazyLock<RwLock<Rodeo>> = LazyLock::new(|| RwLock::new(Rodeo::default()));

/// Interned identifier: dialect namespaces, op names, attribute keys.
///
/// Equality and hashing work on the 4-byte key. Ordering compares the text,
/// so `BTreeMap<Symbol, _>` iterates alphabetically regardless of the order
/// in which names were first interned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Symbol(Spur);

impl Symbol {
    /// Intern a static string.
    pub fn new(text: &'static str) -> Self {
        if let Some(spur) = INTERNER.read().get(text) {
            return Symbol(spur);
        }
        Symbol(INTERNER.write().get_or_intern_static(text))
    }

    /// Intern a runtime string.
    pub fn from_dynamic(text: &str) -> Self {
        if let Some(spur) = INTERNER.read().get(text) {
            return Symbol(spur);
        }
        Symbol(INTERNER.write().get_or_intern(text))
    }

    /// Run `f` on the symbol text without allocating.
    ///
    /// The recursive read lock lets `f` format or compare other symbols.
    pub fn with_str<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        let interner = INTERNER.read_recursive();
        f(interner.resolve(&self.0))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self == other {
            return std::cmp::Ordering::Equal;
        }
        self.with_str(|a| other.with_str(|b| a.cmp(b)))
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&'static str> for Symbol {
    fn from(text: &'static str) -> Self {
        Symbol::new(text)
    }
}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        self.with_str(|s| s == other)
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        self.with_str(|s| s == *other)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_str(|s| f.write_str(s))
    }
}

/// Declare zero-argument functions returning well-known symbols.
///
/// ```
/// bufferize_ir::symbols! {
///     ATTR_AXIS => "axis",
/// }
/// assert_eq!(ATTR_AXIS(), "axis");
/// ```
#[macro_export]
macro_rules! symbols {
    ($($(#[$attr:meta])* $name:ident => $text:literal),* $(,)?) => {
        $(
            $(#[$attr])*
            #[allow(non_snake_case)]
            #[inline]
            pub fn $name() -> $crate::Symbol {
                $crate::Symbol::new($text)
            }
        )*
    };
}

/// Operation kind: a dialect namespace plus an op name, printed `dialect.name`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpKind {
    pub dialect: Symbol,
    pub name: Symbol,
}

impl OpKind {
    pub fn new(dialect: impl Into<Symbol>, name: impl Into<Symbol>) -> Self {
        Self {
            dialect: dialect.into(),
            name: name.into(),
        }
    }

    /// Parse `dialect.name`. The op name may itself contain dots
    /// (`buffer.cast.static` is dialect `buffer`, name `cast.static`).
    pub fn parse(text: &str) -> Option<Self> {
        let (dialect, name) = text.split_once('.')?;
        if dialect.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self {
            dialect: Symbol::from_dynamic(dialect),
            name: Symbol::from_dynamic(name),
        })
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dialect, self.name)
    }
}
