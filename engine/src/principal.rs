//! The authenticated identity a feed or mutation is scoped to.

use crate::PrincipalId;
use serde::{Deserialize, Serialize};

/// An authenticated identity.
///
/// Principals are created and destroyed by the authentication provider.
/// The engine only observes them; it never owns their lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Stable unique identifier issued by the auth provider
    pub id: PrincipalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Principal {
    /// Create a principal with only an identifier.
    pub fn new(id: impl Into<PrincipalId>) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}
