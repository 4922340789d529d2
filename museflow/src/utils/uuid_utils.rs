//! UUID generation utilities.
//!
//! Every entity collection generates its own identifiers; there is no
//! shared counter across entity types.

use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}
