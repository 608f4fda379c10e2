//! Process-scoped correlation identity.
//!
//! One `ClientId` is generated at start-up and handed to both the request
//! encoder and the topology binder, so every request carries the same value
//! that the response queue is bound with.

use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a fresh random (v4) identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Canonical hyphenated text, used as the response binding key.
    pub fn routing_key(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}
