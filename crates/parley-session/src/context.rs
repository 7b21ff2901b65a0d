//! One conversation context: the session state machine and the teardown
//! operations that compose the fingerprint store with the negotiated key
//! material.
//!
//! Transitions into CONNECTED are driven by the handshake layer through
//! [`Context::mark_connected`]; everything else here is the forced-teardown
//! side of the machine.

use std::any::Any;
use std::fmt;

use tracing::debug;

use crate::error::StateError;
use crate::fingerprint::{Fingerprint, FingerprintEntry, FingerprintStore};
use crate::keys::KeyMaterial;
use crate::secret::SecretBytes;

/// Negotiation state of a private session with one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No negotiated remote material.
    #[default]
    Unconnected,
    /// Local DH material exists, no confirmed remote session.
    Setup,
    /// Mutually confirmed shared session.
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Unconnected => "Not private",
            SessionState::Setup => "Setting up",
            SessionState::Connected => "Private",
        })
    }
}

/// Where this side stands on having offered the peer a private session.
///
/// Survives setup teardowns so the policy layer does not re-offer after a
/// rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OfferStatus {
    #[default]
    NotSent,
    Sent,
    Rejected,
    Accepted,
}

/// Outcome of a fingerprint-forget attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintForget {
    /// The entry was removed; others remain.
    Removed,
    /// The entry was removed and it was the last one.
    RemovedLast,
    /// No such fingerprint in this context.
    NotFound,
    /// Refused: the entry backs the currently connected session.
    Refused,
}

/// Conversation state for one (identity, account, protocol) triple.
///
/// Owns the peer's fingerprint store and negotiated key material. The
/// identity fields are fixed at creation; everything else follows the
/// state machine.
pub struct Context {
    identity: String,
    account: String,
    protocol: String,
    state: SessionState,
    fingerprints: FingerprintStore,
    active_fingerprint: Option<Fingerprint>,
    keys: KeyMaterial,
    offer: OfferStatus,
    last_message: Option<SecretBytes>,
    last_sent: u64,
    may_retransmit: bool,
    app_data: Option<Box<dyn Any + Send>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("identity", &self.identity)
            .field("account", &self.account)
            .field("protocol", &self.protocol)
            .field("state", &self.state)
            .field("fingerprints", &self.fingerprints)
            .field("active_fingerprint", &self.active_fingerprint)
            .field("offer", &self.offer)
            .field("last_sent", &self.last_sent)
            .field("may_retransmit", &self.may_retransmit)
            .field("app_data", &self.app_data.as_ref().map(|_| "..."))
            .finish_non_exhaustive()
    }
}

impl Context {
    pub(crate) fn new(identity: &str, account: &str, protocol: &str) -> Self {
        Self {
            identity: identity.to_owned(),
            account: account.to_owned(),
            protocol: protocol.to_owned(),
            state: SessionState::Unconnected,
            fingerprints: FingerprintStore::new(),
            active_fingerprint: None,
            keys: KeyMaterial::new(),
            offer: OfferStatus::NotSent,
            last_message: None,
            last_sent: 0,
            may_retransmit: false,
            app_data: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn offer(&self) -> OfferStatus {
        self.offer
    }

    pub fn set_offer(&mut self, offer: OfferStatus) {
        self.offer = offer;
    }

    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut KeyMaterial {
        &mut self.keys
    }

    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.fingerprints
    }

    /// The entry backing the current CONNECTED session, if any.
    pub fn active_fingerprint(&self) -> Option<&FingerprintEntry> {
        self.fingerprints.find(self.active_fingerprint?)
    }

    // ── Application payload ─────────────────────────────────────────────

    /// Attach an opaque application payload. It is dropped, and thereby
    /// disposed of, when the context is forgotten or the payload replaced.
    pub fn set_app_data(&mut self, data: impl Any + Send) {
        self.app_data = Some(Box::new(data));
    }

    pub fn app_data<T: Any>(&self) -> Option<&T> {
        self.app_data.as_deref()?.downcast_ref()
    }

    // ── Fingerprints ────────────────────────────────────────────────────

    pub fn find_or_add_fingerprint(
        &mut self,
        fingerprint: Fingerprint,
        add_if_missing: bool,
    ) -> Option<(&mut FingerprintEntry, bool)> {
        self.fingerprints.find_or_add(fingerprint, add_if_missing)
    }

    pub fn set_trust(&mut self, fingerprint: Fingerprint, trust: Option<&str>) -> bool {
        self.fingerprints.set_trust(fingerprint, trust)
    }

    /// Remove a fingerprint unless it backs the current CONNECTED session.
    /// The store layer decides whether an emptied context is torn down too.
    pub fn forget_fingerprint(&mut self, fingerprint: Fingerprint) -> FingerprintForget {
        if self.state == SessionState::Connected && self.active_fingerprint == Some(fingerprint) {
            debug!(identity = %self.identity, "refusing to forget the active fingerprint");
            return FingerprintForget::Refused;
        }
        if !self.fingerprints.remove(fingerprint) {
            return FingerprintForget::NotFound;
        }
        if self.fingerprints.is_empty() {
            FingerprintForget::RemovedLast
        } else {
            FingerprintForget::Removed
        }
    }

    // ── State machine ───────────────────────────────────────────────────

    /// Commit a mutually confirmed session backed by `fingerprint`, which
    /// must already be present in this context's store.
    pub fn mark_connected(&mut self, fingerprint: Fingerprint) -> Result<(), StateError> {
        if self.fingerprints.find(fingerprint).is_none() {
            return Err(StateError::UnknownFingerprint(fingerprint));
        }
        self.state = SessionState::Connected;
        self.active_fingerprint = Some(fingerprint);
        debug!(identity = %self.identity, "session is now private");
        Ok(())
    }

    /// Drop every trace of the shared session and fall back to SETUP,
    /// which keeps only local DH material: clears the active fingerprint,
    /// wipes remote-derived key state, and drops the retransmit cache.
    /// Identity fields, fingerprints, and the offer status survive.
    /// Idempotent.
    pub fn force_setup(&mut self) {
        debug!(identity = %self.identity, from = %self.state, "forcing context to setup");
        self.state = SessionState::Setup;
        self.active_fingerprint = None;
        self.keys.wipe_remote();
        self.last_message = None;
        self.may_retransmit = false;
    }

    /// [`Context::force_setup`], then release local DH material as well
    /// and fall back to UNCONNECTED. Required before a context may be
    /// forgotten. Idempotent.
    pub fn force_disconnect(&mut self) {
        self.force_setup();
        self.state = SessionState::Unconnected;
        self.keys.wipe_local();
    }

    // ── Retransmit cache ────────────────────────────────────────────────

    /// Remember the last outbound message so the policy layer can resend
    /// it if the offer goes unanswered.
    pub fn cache_last_message(&mut self, message: &[u8], sent_at: u64) {
        self.last_message = Some(SecretBytes::from(message));
        self.last_sent = sent_at;
        self.may_retransmit = true;
    }

    pub fn may_retransmit(&self) -> bool {
        self.may_retransmit
    }

    pub fn last_sent(&self) -> u64 {
        self.last_sent
    }

    /// Take the cached message, clearing the retransmit flag.
    pub fn take_last_message(&mut self) -> Option<SecretBytes> {
        self.may_retransmit = false;
        self.last_message.take()
    }

    /// Replace the out-of-band pre-shared secret. Empty input clears it.
    pub fn set_preshared_secret(&mut self, secret: &[u8]) {
        self.keys.set_preshared_secret(secret);
    }
}
