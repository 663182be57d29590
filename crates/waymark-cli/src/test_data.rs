//! Credential fixtures for auth flows.
//!
//! The valid login credentials are the account the mock backend knows, so a
//! test that logs in with them against [`crate::mock_server`] succeeds.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Email of the account the mock backend accepts
pub const KNOWN_EMAIL: &str = "a@b.com";

/// Password of the account the mock backend accepts
pub const KNOWN_PASSWORD: &str = "12345678";

const FIRST_NAMES: [&str; 6] = ["Ada", "Grace", "Linus", "Barbara", "Ken", "Frances"];
const LAST_NAMES: [&str; 6] = ["Lovelace", "Hopper", "Torvalds", "Liskov", "Thompson", "Allen"];

/// Credentials and optional profile fields for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestUser {
    /// Email address
    pub email: String,
    /// Password
    pub password: String,
    /// First name
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub first_name: Option<String>,
    /// Last name
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_name: Option<String>,
}

impl TestUser {
    /// User with only credentials set
    #[must_use]
    pub fn credentials(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            first_name: None,
            last_name: None,
        }
    }
}

/// Generates test users
#[derive(Debug, Clone, Copy, Default)]
pub struct TestDataFactory;

impl TestDataFactory {
    /// A fresh user with a unique email and a 12 character password
    #[must_use]
    pub fn valid_user() -> TestUser {
        let id = Uuid::new_v4();
        let bytes = id.as_bytes();
        let simple = id.simple().to_string();
        TestUser {
            email: format!("user-{}@example.com", &simple[..12]),
            password: simple[12..24].to_string(),
            first_name: Some(FIRST_NAMES[usize::from(bytes[0]) % FIRST_NAMES.len()].to_string()),
            last_name: Some(LAST_NAMES[usize::from(bytes[1]) % LAST_NAMES.len()].to_string()),
        }
    }

    /// `count` users from [`Self::valid_user`]
    #[must_use]
    pub fn random_valid_users(count: usize) -> Vec<TestUser> {
        (0..count).map(|_| Self::valid_user()).collect()
    }

    /// Malformed, empty, too-short and common-password inputs
    #[must_use]
    pub fn invalid_users() -> Vec<TestUser> {
        vec![
            TestUser::credentials("invalid-email", "short"),
            TestUser::credentials("", ""),
            TestUser::credentials("test@test.com", "123"),
            TestUser::credentials("test@test.com", "password123"),
        ]
    }

    /// The account the mock backend accepts
    #[must_use]
    pub fn valid_login_credentials() -> TestUser {
        TestUser::credentials(KNOWN_EMAIL, KNOWN_PASSWORD)
    }

    /// Unknown account, and a plausible email with the wrong password
    #[must_use]
    pub fn invalid_login_credentials() -> Vec<TestUser> {
        vec![
            TestUser::credentials("nonexistent@example.com", "WrongPassword123!"),
            TestUser::credentials(KNOWN_EMAIL, "WrongPassword123!"),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_valid_user_shape() {
        let user = TestDataFactory::valid_user();
        assert!(user.email.starts_with("user-"));
        assert!(user.email.ends_with("@example.com"));
        assert_eq!(user.password.len(), 12);
        assert!(user.first_name.is_some());
        assert!(user.last_name.is_some());
    }

    #[test]
    fn test_generated_emails_are_unique() {
        let users = TestDataFactory::random_valid_users(50);
        let emails: HashSet<_> = users.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails.len(), 50);
    }

    #[test]
    fn test_invalid_users_cover_empty_input() {
        let users = TestDataFactory::invalid_users();
        assert_eq!(users.len(), 4);
        assert!(users.iter().any(|u| u.email.is_empty() && u.password.is_empty()));
        assert!(users.iter().any(|u| !u.email.contains('@')));
    }

    #[test]
    fn test_invalid_login_never_matches_known_account() {
        let valid = TestDataFactory::valid_login_credentials();
        for user in TestDataFactory::invalid_login_credentials() {
            assert_ne!(user, valid);
        }
    }

    #[test]
    fn test_serializes_camel_case_without_missing_names() {
        let json = serde_json::to_value(TestDataFactory::valid_login_credentials()).unwrap();
        assert_eq!(json["email"], KNOWN_EMAIL);
        assert!(json.get("firstName").is_none());

        let json = serde_json::to_value(TestDataFactory::valid_user()).unwrap();
        assert!(json["firstName"].is_string());
    }
}
