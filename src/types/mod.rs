pub mod error;

pub use error::{ErrorClass, ErrorClassifier, ErrorKind, GatewayError, ProviderError, Result};

// =============================================================================
// Domain Newtypes
// =============================================================================

use std::fmt;

/// Type-safe wrapper for conversation IDs
///
/// Used as the per-resource rate limit scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod newtype_tests {
    use super::*;

    #[test]
    fn test_conversation_id() {
        let id = ConversationId::new("conv-123");
        assert_eq!(id.as_str(), "conv-123");
        assert_eq!(format!("{}", id), "conv-123");
        assert_eq!(ConversationId::from("conv-123"), id);
    }
}
