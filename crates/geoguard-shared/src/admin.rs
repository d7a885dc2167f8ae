//! Administrator allow-list.
//!
//! Admin rights are binary: an identity is an administrator when its email
//! matches an entry of the allow-list exactly, ignoring case and surrounding
//! whitespace.

use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminPolicy {
    emails: HashSet<String>,
}

impl AdminPolicy {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let emails = emails
            .into_iter()
            .map(|e| normalize(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        Self { emails }
    }

    /// Parse a comma separated list, as found in environment variables.
    pub fn from_csv(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn is_admin(&self, email: &str) -> bool {
        let email = normalize(email);
        !email.is_empty() && self.emails.contains(&email)
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_ignores_case_and_whitespace() {
        let policy = AdminPolicy::new(["Admin@Example.com"]);
        assert!(policy.is_admin("admin@example.com"));
        assert!(policy.is_admin("  ADMIN@example.COM "));
    }

    #[test]
    fn test_no_partial_match() {
        let policy = AdminPolicy::new(["admin@example.com"]);
        assert!(!policy.is_admin("admin@example.co"));
        assert!(!policy.is_admin("xadmin@example.com"));
        assert!(!policy.is_admin(""));
    }

    #[test]
    fn test_from_csv_skips_empty_entries() {
        let policy = AdminPolicy::from_csv("a@x.io, ,b@x.io,");
        assert_eq!(policy.len(), 2);
        assert!(policy.is_admin("b@x.io"));
    }
}
