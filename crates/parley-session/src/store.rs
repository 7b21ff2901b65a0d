//! The application-wide collection of conversation contexts, ordered by
//! (identity, account, protocol).
//!
//! The store owns every [`Context`]; callers look contexts up (creating on
//! demand) and route the destructive operations through here so teardown
//! can cascade from a fingerprint up to the whole context.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use tracing::debug;

use crate::context::{Context, FingerprintForget, SessionState};
use crate::error::StateError;
use crate::fingerprint::Fingerprint;

/// Composite lookup key for a context. The derived ordering compares
/// identity, then account, then protocol, each lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContextKey {
    pub identity: String,
    pub account: String,
    pub protocol: String,
}

impl ContextKey {
    /// Build a key, rejecting empty fields so a malformed entry can never
    /// be created or matched.
    pub fn new(identity: &str, account: &str, protocol: &str) -> Result<Self, StateError> {
        if identity.is_empty() || account.is_empty() || protocol.is_empty() {
            return Err(StateError::EmptyContextKey);
        }
        Ok(Self {
            identity: identity.to_owned(),
            account: account.to_owned(),
            protocol: protocol.to_owned(),
        })
    }
}

/// Every conversation context known to one application instance, kept in
/// (identity, account, protocol) order with no duplicate triples.
///
/// No internal locking: a store has a single logical owner and the caller
/// serializes access.
#[derive(Default)]
pub struct ContextStore {
    contexts: BTreeMap<ContextKey, Context>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Iterate contexts in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.contexts.values()
    }

    pub fn find(&self, identity: &str, account: &str, protocol: &str) -> Option<&Context> {
        let key = ContextKey::new(identity, account, protocol).ok()?;
        self.contexts.get(&key)
    }

    pub fn find_mut(
        &mut self,
        identity: &str,
        account: &str,
        protocol: &str,
    ) -> Option<&mut Context> {
        let key = ContextKey::new(identity, account, protocol).ok()?;
        self.contexts.get_mut(&key)
    }

    /// Look up a context, creating it when missing. `on_create` runs
    /// synchronously, once, after the new context is fully linked, so the
    /// application can attach its payload. Returns the context and whether
    /// it was created.
    pub fn find_or_create(
        &mut self,
        identity: &str,
        account: &str,
        protocol: &str,
        on_create: impl FnOnce(&mut Context),
    ) -> Result<(&mut Context, bool), StateError> {
        let key = ContextKey::new(identity, account, protocol)?;
        match self.contexts.entry(key) {
            Entry::Occupied(entry) => Ok((entry.into_mut(), false)),
            Entry::Vacant(entry) => {
                debug!(identity, account, protocol, "creating context");
                let context = entry.insert(Context::new(identity, account, protocol));
                on_create(context);
                Ok((context, true))
            }
        }
    }

    /// Destroy a context. Refuses (returns false) unless it is
    /// UNCONNECTED. On success the context is re-wiped defensively, in
    /// case a prior caller skipped the disconnect, then unlinked; its
    /// fingerprints and application payload drop with it.
    pub fn forget(&mut self, identity: &str, account: &str, protocol: &str) -> bool {
        let Ok(key) = ContextKey::new(identity, account, protocol) else {
            return false;
        };
        let Some(context) = self.contexts.get_mut(&key) else {
            return false;
        };
        if context.state() != SessionState::Unconnected {
            return false;
        }
        context.force_disconnect();
        self.contexts.remove(&key);
        debug!(identity, account, protocol, "context forgotten");
        true
    }

    /// Forget one fingerprint of a context, refusing when it backs a live
    /// connected session. When the removed entry was the last one and the
    /// context is UNCONNECTED, `and_maybe_context` tears the whole context
    /// down as well.
    pub fn forget_fingerprint(
        &mut self,
        identity: &str,
        account: &str,
        protocol: &str,
        fingerprint: Fingerprint,
        and_maybe_context: bool,
    ) -> FingerprintForget {
        let Some(context) = self.find_mut(identity, account, protocol) else {
            return FingerprintForget::NotFound;
        };
        let outcome = context.forget_fingerprint(fingerprint);
        if outcome == FingerprintForget::RemovedLast
            && and_maybe_context
            && context.state() == SessionState::Unconnected
        {
            self.forget(identity, account, protocol);
        }
        outcome
    }

    /// Force every context to UNCONNECTED and destroy it, head first,
    /// until the store is empty. Full-shutdown path.
    pub fn forget_all(&mut self) {
        while let Some((_, mut context)) = self.contexts.pop_first() {
            context.force_disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> ContextStore {
        ContextStore::new()
    }

    fn fp(seed: u8) -> Fingerprint {
        Fingerprint::new([seed; 20])
    }

    // ── Lookup and creation ────────────────────────────────────────────

    #[test]
    fn find_or_create_returns_existing() {
        let mut store = make_store();
        let (_, created) = store
            .find_or_create("alice", "acct", "proto", |_| {})
            .unwrap();
        assert!(created);
        let (_, created) = store
            .find_or_create("alice", "acct", "proto", |_| {})
            .unwrap();
        assert!(!created);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_key_fields_rejected() {
        let mut store = make_store();
        let err = store
            .find_or_create("", "acct", "proto", |_| {})
            .unwrap_err();
        assert!(matches!(err, StateError::EmptyContextKey));
        assert!(store.find("alice", "", "proto").is_none());
        assert!(!store.forget("alice", "acct", ""));
        assert!(store.is_empty());
    }

    #[test]
    fn find_unknown_returns_none() {
        let store = make_store();
        assert!(store.find("nobody", "acct", "proto").is_none());
    }

    #[test]
    fn creation_hook_runs_once_and_can_attach_payload() {
        let mut store = make_store();
        let (context, created) = store
            .find_or_create("alice", "acct", "proto", |c| {
                c.set_app_data(String::from("widget"));
            })
            .unwrap();
        assert!(created);
        assert_eq!(context.app_data::<String>().unwrap(), "widget");

        let mut hook_ran = false;
        let (_, created) = store
            .find_or_create("alice", "acct", "proto", |_| hook_ran = true)
            .unwrap();
        assert!(!created);
        assert!(!hook_ran);
    }

    #[test]
    fn stays_sorted_under_random_creates() {
        use rand::seq::SliceRandom;

        let mut triples = Vec::new();
        for i in 0..8 {
            for a in 0..2 {
                for p in 0..2 {
                    triples.push((format!("peer{i}"), format!("acct{a}"), format!("proto{p}")));
                }
            }
        }

        let mut shuffled = triples.clone();
        shuffled.shuffle(&mut rand::thread_rng());

        let mut store = make_store();
        for (identity, account, protocol) in &shuffled {
            store
                .find_or_create(identity, account, protocol, |_| {})
                .unwrap();
        }
        // Re-creating never duplicates.
        for (identity, account, protocol) in &shuffled {
            let (_, created) = store
                .find_or_create(identity, account, protocol, |_| {})
                .unwrap();
            assert!(!created);
        }

        assert_eq!(store.len(), triples.len());
        let order: Vec<(String, String, String)> = store
            .iter()
            .map(|c| {
                (
                    c.identity().to_owned(),
                    c.account().to_owned(),
                    c.protocol().to_owned(),
                )
            })
            .collect();
        assert_eq!(order, triples);
    }

    #[test]
    fn protocols_sort_adjacently_for_same_peer() {
        let mut store = make_store();
        store
            .find_or_create("alice", "bob_account", "proto2", |_| {})
            .unwrap();
        store
            .find_or_create("alice", "bob_account", "proto1", |_| {})
            .unwrap();

        assert_eq!(store.len(), 2);
        let protocols: Vec<&str> = store.iter().map(|c| c.protocol()).collect();
        assert_eq!(protocols, vec!["proto1", "proto2"]);
    }

    // ── Forgetting contexts ────────────────────────────────────────────

    #[test]
    fn forget_requires_unconnected() {
        let mut store = make_store();
        store
            .find_or_create("alice", "acct", "proto", |_| {})
            .unwrap();

        store.find_mut("alice", "acct", "proto").unwrap().force_setup();
        assert!(!store.forget("alice", "acct", "proto"));
        assert!(store.find("alice", "acct", "proto").is_some());

        let context = store.find_mut("alice", "acct", "proto").unwrap();
        context.find_or_add_fingerprint(fp(1), true).unwrap();
        context.mark_connected(fp(1)).unwrap();
        assert!(!store.forget("alice", "acct", "proto"));
        assert!(store.find("alice", "acct", "proto").is_some());

        store
            .find_mut("alice", "acct", "proto")
            .unwrap()
            .force_disconnect();
        assert!(store.forget("alice", "acct", "proto"));
        assert!(store.find("alice", "acct", "proto").is_none());
    }

    #[test]
    fn forget_unknown_returns_false() {
        let mut store = make_store();
        assert!(!store.forget("nobody", "acct", "proto"));
    }

    #[test]
    fn forget_all_drains_every_state() {
        let mut store = make_store();
        store
            .find_or_create("alice", "acct", "proto", |_| {})
            .unwrap();
        store.find_or_create("bob", "acct", "proto", |_| {}).unwrap();
        store
            .find_or_create("carol", "acct", "proto", |_| {})
            .unwrap();

        store.find_mut("bob", "acct", "proto").unwrap().force_setup();
        let context = store.find_mut("carol", "acct", "proto").unwrap();
        context.find_or_add_fingerprint(fp(1), true).unwrap();
        context.mark_connected(fp(1)).unwrap();

        store.forget_all();
        assert!(store.is_empty());
    }

    // ── Forgetting fingerprints ────────────────────────────────────────

    #[test]
    fn active_fingerprint_survives_forget_until_disconnect() {
        let mut store = make_store();
        let f1 = Fingerprint::new([0u8; 20]);
        {
            let (context, created) = store
                .find_or_create("alice", "bob_account", "proto", |_| {})
                .unwrap();
            assert!(created);
            let (_, added) = context.find_or_add_fingerprint(f1, true).unwrap();
            assert!(added);
            assert!(context.set_trust(f1, Some("verified")));
            context.mark_connected(f1).unwrap();
        }

        // Refused while the session is private and F1 backs it.
        assert_eq!(
            store.forget_fingerprint("alice", "bob_account", "proto", f1, true),
            FingerprintForget::Refused
        );
        let context = store.find("alice", "bob_account", "proto").unwrap();
        let entry = context.fingerprints().find(f1).unwrap();
        assert_eq!(entry.trust(), Some("verified"));

        // After a disconnect the removal succeeds, and since F1 was the
        // only fingerprint the whole context cascades away.
        store
            .find_mut("alice", "bob_account", "proto")
            .unwrap()
            .force_disconnect();
        assert_eq!(
            store.forget_fingerprint("alice", "bob_account", "proto", f1, true),
            FingerprintForget::RemovedLast
        );
        assert!(store.find("alice", "bob_account", "proto").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn last_fingerprint_without_cascade_keeps_context() {
        let mut store = make_store();
        let (context, _) = store
            .find_or_create("alice", "acct", "proto", |_| {})
            .unwrap();
        context.find_or_add_fingerprint(fp(1), true).unwrap();

        assert_eq!(
            store.forget_fingerprint("alice", "acct", "proto", fp(1), false),
            FingerprintForget::RemovedLast
        );
        assert!(store.find("alice", "acct", "proto").is_some());
    }

    #[test]
    fn cascade_requires_unconnected_context() {
        let mut store = make_store();
        let (context, _) = store
            .find_or_create("alice", "acct", "proto", |_| {})
            .unwrap();
        context.find_or_add_fingerprint(fp(1), true).unwrap();
        context.force_setup();

        assert_eq!(
            store.forget_fingerprint("alice", "acct", "proto", fp(1), true),
            FingerprintForget::RemovedLast
        );
        // Still in SETUP, so the context must not cascade away.
        assert!(store.find("alice", "acct", "proto").is_some());
    }

    #[test]
    fn forget_fingerprint_unknown_context() {
        let mut store = make_store();
        assert_eq!(
            store.forget_fingerprint("nobody", "acct", "proto", fp(1), true),
            FingerprintForget::NotFound
        );
    }
}
