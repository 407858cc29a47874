use crate::error::Error;

/// Result type alias used throughout keel.
///
/// Shorthand for `std::result::Result<T, Error>`. Every fallible keel
/// operation returns this type.
pub type Result<T> = std::result::Result<T, Error>;
