//! Credential store: expected username plus a SHA-1 password verifier.
//!
//! The configuration holds the lowercase hex SHA-1 of the client secret, never
//! the secret itself.  At handshake time the relay hashes the value the
//! client sent and compares digests.

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Length of a hex-encoded SHA-1 digest.
pub const DIGEST_HEX_LEN: usize = 40;

/// Errors raised while building [`Credentials`] from configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// The configured username is empty.
    #[error("username must not be empty")]
    EmptyUsername,

    /// The configured password verifier is not a hex SHA-1 digest.
    #[error("password must be a 40-character hex SHA-1 digest (got {len} characters)")]
    MalformedDigest { len: usize },
}

/// Returns the lowercase hex SHA-1 digest of `secret`.
///
/// # Examples
///
/// ```rust
/// use callbridge_core::auth::password_digest;
///
/// assert_eq!(password_digest("foo"), "0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33");
/// ```
pub fn password_digest(secret: &str) -> String {
    format!("{:x}", Sha1::digest(secret.as_bytes()))
}

/// Immutable login data loaded once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    digest: String,
}

impl Credentials {
    /// Builds the store from a username and a hex SHA-1 verifier.
    ///
    /// The digest is accepted in either case and stored lowercase.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the username is empty or the digest is
    /// not exactly [`DIGEST_HEX_LEN`] hex characters.
    pub fn new(username: impl Into<String>, digest: &str) -> Result<Self, CredentialError> {
        let username = username.into();
        if username.is_empty() {
            return Err(CredentialError::EmptyUsername);
        }

        let digest = digest.trim();
        if digest.len() != DIGEST_HEX_LEN || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CredentialError::MalformedDigest {
                len: digest.chars().count(),
            });
        }

        Ok(Self {
            username,
            digest: digest.to_ascii_lowercase(),
        })
    }

    /// The expected username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns `true` only if the username matches exactly *and* the SHA-1 of
    /// `secret` matches the stored verifier.
    ///
    /// Both parts are always evaluated so a wrong username and a wrong
    /// password are indistinguishable to the caller.
    pub fn verify(&self, username: &str, secret: &str) -> bool {
        let user_ok = username.as_bytes().ct_eq(self.username.as_bytes());
        let digest_ok = password_digest(secret)
            .as_bytes()
            .ct_eq(self.digest.as_bytes());
        (user_ok & digest_ok).into()
    }
}

impl std::fmt::Debug for Credentials {
    // Keep the verifier out of log output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("digest", &"<redacted>")
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FOO_SHA1: &str = "0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33";

    fn alice() -> Credentials {
        Credentials::new("alice", FOO_SHA1).unwrap()
    }

    #[test]
    fn test_password_digest_known_vectors() {
        assert_eq!(password_digest("foo"), FOO_SHA1);
        assert_eq!(
            password_digest(""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn test_verify_accepts_correct_pair() {
        assert!(alice().verify("alice", "foo"));
    }

    #[test]
    fn test_verify_rejects_wrong_password() {
        assert!(!alice().verify("alice", "bar"));
    }

    #[test]
    fn test_verify_rejects_wrong_username() {
        assert!(!alice().verify("bob", "foo"));
    }

    #[test]
    fn test_verify_username_is_case_sensitive() {
        assert!(!alice().verify("Alice", "foo"));
    }

    #[test]
    fn test_verify_does_not_accept_the_digest_itself() {
        // The client must send the secret; replaying the stored verifier fails.
        assert!(!alice().verify("alice", FOO_SHA1));
    }

    #[test]
    fn test_new_accepts_uppercase_digest() {
        let creds = Credentials::new("alice", &FOO_SHA1.to_ascii_uppercase()).unwrap();
        assert!(creds.verify("alice", "foo"));
    }

    #[test]
    fn test_new_trims_digest_whitespace() {
        let creds = Credentials::new("alice", &format!(" {FOO_SHA1}\n")).unwrap();
        assert!(creds.verify("alice", "foo"));
    }

    #[test]
    fn test_new_rejects_short_digest() {
        let err = Credentials::new("alice", "abc").unwrap_err();
        assert_eq!(err, CredentialError::MalformedDigest { len: 3 });
    }

    #[test]
    fn test_new_rejects_non_hex_digest() {
        let bad = "z".repeat(DIGEST_HEX_LEN);
        assert!(matches!(
            Credentials::new("alice", &bad),
            Err(CredentialError::MalformedDigest { len: 40 })
        ));
    }

    #[test]
    fn test_new_rejects_empty_username() {
        assert_eq!(
            Credentials::new("", FOO_SHA1).unwrap_err(),
            CredentialError::EmptyUsername
        );
    }

    #[test]
    fn test_debug_redacts_digest() {
        let out = format!("{:?}", alice());
        assert!(out.contains("alice"));
        assert!(!out.contains(FOO_SHA1));
    }

    #[test]
    fn test_verify_rejects_username_prefix_and_extension() {
        let creds = alice();
        assert!(!creds.verify("ali", "foo"));
        assert!(!creds.verify("alice2", "foo"));
        assert!(!creds.verify("", "foo"));
    }
}
