//! UUID utilities
//!
//! All identifiers in the store are v4 UUIDs. A deleted asset's identifier is
//! never reused: fresh identifiers are always generated, never recycled.

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse UUID from string
pub fn parse(s: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(s)
}
