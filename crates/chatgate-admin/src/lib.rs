//! Operator routes guarded by `x-admin-key`.

mod router;

pub use router::{AdminState, router};
