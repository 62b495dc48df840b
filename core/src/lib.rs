//! Foundation layer of the taurus planning stack: typed integer handles,
//! interning collections and the symbol/type tables that every other crate
//! builds its problem representation on.

pub mod collections;
pub mod model;

/// Integer type used to represent times, durations and deadlines.
pub type IntCst = i32;

/// Value used as +infinity in shortest-path and reachability tables.
/// Half of the representable range so that adding two "infinite" values does
/// not overflow.
pub const INT_CST_MAX: IntCst = IntCst::MAX / 2;
