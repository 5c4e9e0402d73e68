//! Message Identifiers
//!
//! Globally unique identifiers assigned at envelope creation. Replies carry
//! the id of the request they answer, which is how the pending-reply
//! registry correlates them and how duplicate or delayed deliveries are
//! recognized and discarded.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    id: Uuid,
}

impl MessageId {
    /// Create a fresh random identifier
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Create from a UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self { id }
    }

    /// Get the underlying UUID
    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.id.simple())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_format() {
        let id = MessageId::new();
        assert!(format!("{}", id).starts_with("msg-"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = MessageId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_uuid_roundtrip() {
        let id = MessageId::new();
        assert_eq!(MessageId::from_uuid(id.uuid()), id);
    }
}
