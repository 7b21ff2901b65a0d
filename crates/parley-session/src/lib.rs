//! Parley conversation-state core — per-peer session state and key
//! lifecycle.
//!
//! This crate provides:
//! - The per-peer connection context and its negotiation state machine
//! - Known-fingerprint tracking with trust annotations
//! - Storage for negotiated DH material across key rotations
//! - Ordered, cascading teardown of secret material
//!
//! Key generation, session-key derivation, the authenticated key exchange,
//! and message protection live elsewhere; this crate is the state
//! container those layers operate on. A [`store::ContextStore`] has a
//! single logical owner: callers serialize access themselves.

pub mod context;
pub mod error;
pub mod fingerprint;
pub mod keys;
pub mod secret;
pub mod store;

// Re-export key types for convenience
pub use context::{Context, FingerprintForget, OfferStatus, SessionState};
pub use error::StateError;
pub use fingerprint::{Fingerprint, FingerprintEntry, FingerprintStore, FINGERPRINT_LEN};
pub use keys::{
    DhKeypair, KeyMaterial, MacKey, SessionKeyCache, SessionKeys, MAC_KEY_LEN, SESSION_ID_LEN,
};
pub use secret::SecretBytes;
pub use store::{ContextKey, ContextStore};
