//! Signed-in user profile

use serde::{Deserialize, Serialize};

/// What the login exchange tells us about the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub email: String,
    /// Set by the login endpoint when the account must rotate its password
    #[serde(default)]
    pub password_change_required: bool,
}

impl Profile {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password_change_required: false,
        }
    }
}
