//! Error types for the gena-wire crate.

use thiserror::Error;

/// Errors raised while parsing or rendering GENA wire data.
///
/// Header grammars with a sensible fallback ([`Timeout`](crate::Timeout),
/// the CALLBACK list) signal failure through `Option` or an empty list
/// instead; only the property-set body produces a hard error.
#[derive(Debug, Error)]
pub enum WireError {
    /// The property-set body was empty or not well-formed XML
    #[error("Invalid property set: {0}")]
    InvalidPropertySet(String),
}
