//! # gena-wire
//!
//! Wire-level vocabulary for the GENA (General Event Notification
//! Architecture) eventing protocol: header constants and parsing, the
//! `Second-<n>` timeout grammar, CALLBACK delivery-URL lists, property-set
//! XML bodies, and event-key (sequence number) arithmetic.
//!
//! Both the publisher (`gena-device`) and control-point (`gena-ctrlpt`)
//! crates build on this one; it performs no I/O.

mod callback;
mod error;
mod event_key;
mod property_set;
mod timeout;

pub use callback::{parse_callback_header, DeliveryUrl};
pub use error::WireError;
pub use event_key::EventKey;
pub use property_set::{Property, PropertySet};
pub use timeout::Timeout;

/// Required NT header value for GENA subscriptions and notifications.
pub const NT_EVENT: &str = "upnp:event";

/// Required NTS header value for GENA notifications.
pub const NTS_PROPCHANGE: &str = "upnp:propchange";

/// Textual prefix applied to every subscription identifier.
pub const SID_PREFIX: &str = "uuid:";

/// Convenience type alias for Results using WireError.
pub type Result<T> = std::result::Result<T, WireError>;
