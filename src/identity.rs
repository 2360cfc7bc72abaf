//! Acting-identity resolution.

use std::collections::BTreeSet;

/// Resolves which email addresses belong to the acting user. Backed by a
/// directory or account service in production; [`StaticIdentity`] covers
/// tests and single-user deployments.
pub trait IdentityResolver: Send + Sync {
    /// Whether the address belongs to the current identity.
    fn is_self(&self, email: &str) -> bool;

    /// All addresses (lower-cased) of the given acting user.
    fn emails_of(&self, acting_user: &str) -> BTreeSet<String>;
}

/// Fixed identity with optional aliases.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    primary: String,
    aliases: BTreeSet<String>,
}

impl StaticIdentity {
    pub fn new(primary: impl Into<String>) -> Self {
        StaticIdentity {
            primary: primary.into().to_lowercase(),
            aliases: BTreeSet::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into().to_lowercase());
        self
    }
}

impl IdentityResolver for StaticIdentity {
    fn is_self(&self, email: &str) -> bool {
        let email = email.to_lowercase();
        email == self.primary || self.aliases.contains(&email)
    }

    fn emails_of(&self, acting_user: &str) -> BTreeSet<String> {
        let mut emails = self.aliases.clone();
        emails.insert(self.primary.clone());
        emails.insert(acting_user.to_lowercase());
        emails
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_self_is_case_insensitive() {
        let id = StaticIdentity::new("User@Example.com").with_alias("u@example.com");
        assert!(id.is_self("user@example.com"));
        assert!(id.is_self("U@EXAMPLE.COM"));
        assert!(!id.is_self("other@example.com"));
    }

    #[test]
    fn test_emails_of_includes_acting_address() {
        let id = StaticIdentity::new("user@example.com");
        let emails = id.emails_of("User@Example.com");
        assert!(emails.contains("user@example.com"));
    }
}
