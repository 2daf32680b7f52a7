//! Connection Identity and Credentials
//!
//! Every upstream session is bound to exactly one API credential. A
//! connection's identity is the position of its credential in the pool, so
//! ids stay stable across restarts and reconnects.

use std::fmt;

/// Stable identifier of a feed connection (1-based pool position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(usize);

impl ConnectionId {
    /// Create an id from a 1-based pool position.
    #[must_use]
    pub const fn new(position: usize) -> Self {
        Self(position)
    }

    /// The 1-based pool position.
    #[must_use]
    pub const fn position(self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An opaque upstream access token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    /// Wrap a raw token. Surrounding whitespace is trimmed.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into().trim().to_string(),
        }
    }

    /// The raw token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// A credential is usable when the token is non-blank.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.token.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Ordered pool of credentials, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct CredentialPool {
    entries: Vec<Credential>,
}

impl CredentialPool {
    /// Build a pool preserving the given order.
    #[must_use]
    pub fn new(entries: Vec<Credential>) -> Self {
        Self { entries }
    }

    /// Total configured entries, valid or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool has no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Valid credentials paired with their connection id.
    ///
    /// Invalid entries are skipped but still occupy their position, so the
    /// ids of the remaining credentials never shift.
    pub fn valid(&self) -> impl Iterator<Item = (ConnectionId, &Credential)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, credential)| credential.is_valid())
            .map(|(index, credential)| (ConnectionId::new(index + 1), credential))
    }

    /// Number of valid credentials.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.valid().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId::new(3).to_string(), "conn-3");
    }

    #[test]
    fn connection_ids_order_by_position() {
        let mut ids = vec![ConnectionId::new(3), ConnectionId::new(1), ConnectionId::new(2)];
        ids.sort();
        assert_eq!(
            ids,
            vec![ConnectionId::new(1), ConnectionId::new(2), ConnectionId::new(3)]
        );
    }

    #[test]
    fn credential_redacted_debug() {
        let credential = Credential::new("secret-token");
        let debug = format!("{credential:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn blank_credentials_keep_their_position() {
        let pool = CredentialPool::new(vec![
            Credential::new("a"),
            Credential::new("   "),
            Credential::new("c"),
        ]);

        let ids: Vec<_> = pool.valid().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![ConnectionId::new(1), ConnectionId::new(3)]);
        assert_eq!(pool.valid_count(), 2);
        assert_eq!(pool.len(), 3);
    }
}
