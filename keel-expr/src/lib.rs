pub mod expr;
pub use expr::*;

pub mod relationship;
pub use relationship::Relationship;
