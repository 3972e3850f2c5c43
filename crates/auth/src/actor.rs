use serde::{Deserialize, Serialize};

use crate::{Email, Role};

/// Authenticated identity + role performing an operation.
///
/// Built by the authentication boundary from a verified credential on every
/// call; the core never caches or mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorContext {
    email: Email,
    role: Role,
}

impl ActorContext {
    pub fn new(email: Email, role: Role) -> Self {
        Self { email, role }
    }

    pub fn email(&self) -> &Email {
        &self.email
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether this actor is the holder of `email`.
    pub fn is(&self, email: &Email) -> bool {
        &self.email == email
    }
}
