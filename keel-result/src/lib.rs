//! Error types and result definitions for the keel workspace.
//!
//! Every keel crate returns [`Result<T>`], whose error variant is the single
//! [`Error`] enum defined here. Errors propagate with the `?` operator and are
//! never recovered locally: a violation raised by a rule aborts the enclosing
//! transaction and is surfaced to the caller unchanged.
//!
//! # Error Categories
//!
//! - **Constraint violations** ([`Error::ConstraintViolation`]): scalar and
//!   array foreign keys, in both directions
//! - **Array shape violations** ([`Error::ArrayShapeViolation`]): a foreign key
//!   array with more than one dimension or with duplicate entries
//! - **Configuration errors** ([`Error::ConfigurationError`]): rejected at rule
//!   registration, before any event is processed
//! - **Host errors**: missing tables, lock timeouts, aborted transactions,
//!   runaway trigger cascades and internal bugs

pub mod error;
pub mod result;

pub use error::{ArrayShapeKind, Error};
pub use result::Result;
