pub mod flatten;
pub mod group_by;
pub mod paren;
pub mod transformer;
pub mod wrapper;

pub use transformer::{RewriteKind, RewriteOutcome, RewriteRecord, Transformer};
