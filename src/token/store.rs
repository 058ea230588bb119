//! Token Store
//!
//! Process-lifetime record of the current token per client identity.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::types::{ClientIdentity, TokenInfo};

/// Token store interface.
///
/// Operations are synchronous: the single-flight refresher consults the store
/// while holding its in-flight lock, so a lookup must never suspend.
pub trait TokenStore: Send + Sync {
    /// Current token for an identity.
    fn get(&self, identity: &ClientIdentity) -> Option<TokenInfo>;

    /// Replace the token for an identity.
    fn store(&self, identity: ClientIdentity, token: TokenInfo);

    /// Remove the token for an identity.
    fn remove(&self, identity: &ClientIdentity) -> bool;

    /// Remove the token only if `predicate` accepts the stored value.
    fn remove_if(&self, identity: &ClientIdentity, predicate: &dyn Fn(&TokenInfo) -> bool)
        -> bool;

    /// All identities with a stored token.
    fn identities(&self) -> Vec<ClientIdentity>;

    /// Remove every token.
    fn clear(&self);

    /// Remove expired tokens, returning how many were dropped.
    fn clear_expired(&self) -> usize;
}

/// In-memory token store.
#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<HashMap<ClientIdentity, TokenInfo>>,
}

impl InMemoryTokenStore {
    /// Create new in-memory token store.
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<ClientIdentity, TokenInfo>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenStore for InMemoryTokenStore {
    fn get(&self, identity: &ClientIdentity) -> Option<TokenInfo> {
        self.tokens().get(identity).cloned()
    }

    fn store(&self, identity: ClientIdentity, token: TokenInfo) {
        self.tokens().insert(identity, token);
    }

    fn remove(&self, identity: &ClientIdentity) -> bool {
        self.tokens().remove(identity).is_some()
    }

    fn remove_if(
        &self,
        identity: &ClientIdentity,
        predicate: &dyn Fn(&TokenInfo) -> bool,
    ) -> bool {
        let mut tokens = self.tokens();
        match tokens.get(identity) {
            Some(token) if predicate(token) => tokens.remove(identity).is_some(),
            _ => false,
        }
    }

    fn identities(&self) -> Vec<ClientIdentity> {
        self.tokens().keys().cloned().collect()
    }

    fn clear(&self) {
        self.tokens().clear();
    }

    fn clear_expired(&self) -> usize {
        let mut tokens = self.tokens();
        let before = tokens.len();
        tokens.retain(|_, token| !token.is_expired());
        before - tokens.len()
    }
}

/// Create in-memory token store.
pub fn create_in_memory_token_store() -> InMemoryTokenStore {
    InMemoryTokenStore::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    fn token(access: &str) -> TokenInfo {
        TokenInfo::issued_now(
            access,
            "secondary",
            Duration::from_secs(3000),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn test_store_and_get() {
        let store = InMemoryTokenStore::new();
        let identity = ClientIdentity::named("a");

        assert!(store.get(&identity).is_none());
        store.store(identity.clone(), token("one"));
        assert_eq!(store.get(&identity).unwrap().access_credential(), "one");

        store.store(identity.clone(), token("two"));
        assert_eq!(store.get(&identity).unwrap().access_credential(), "two");
        assert_eq!(store.identities(), vec![identity]);
    }

    #[test]
    fn test_remove_if_only_matching() {
        let store = InMemoryTokenStore::new();
        let identity = ClientIdentity::named("a");
        store.store(identity.clone(), token("current"));

        assert!(!store.remove_if(&identity, &|t| t.access_credential() == "stale"));
        assert!(store.get(&identity).is_some());
        assert!(store.remove_if(&identity, &|t| t.access_credential() == "current"));
        assert!(store.get(&identity).is_none());
    }

    #[test]
    fn test_clear_expired() {
        let store = InMemoryTokenStore::new();
        store.store(ClientIdentity::named("live"), token("live"));
        store.store(
            ClientIdentity::named("dead"),
            TokenInfo::new(
                "dead",
                "secondary",
                Utc::now() - ChronoDuration::hours(2),
                Duration::from_secs(3000),
                Duration::from_secs(300),
            ),
        );

        assert_eq!(store.clear_expired(), 1);
        assert!(store.get(&ClientIdentity::named("live")).is_some());

        store.clear();
        assert!(store.identities().is_empty());
    }
}
