//! Negotiated Diffie-Hellman state for one peer.
//!
//! Pure storage: keypair generation and session-key derivation belong to
//! the key-agreement subsystem, which hands finished values in. The only
//! logic owned here is rotation bookkeeping and the ordered teardown used
//! by the session state machine.

use crate::secret::SecretBytes;

/// Bytes in a session identifier.
pub const SESSION_ID_LEN: usize = 20;

/// Bytes in a message-authentication key.
pub const MAC_KEY_LEN: usize = 20;

/// A 20-byte message-authentication key, wiped on drop.
#[derive(Clone, zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct MacKey(pub [u8; MAC_KEY_LEN]);

impl MacKey {
    pub fn as_bytes(&self) -> &[u8; MAC_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MacKey(..)")
    }
}

/// A Diffie-Hellman keypair as delivered by the key-agreement subsystem.
///
/// The integer values are opaque big-endian encodings; arithmetic on them
/// is the bignum layer's business. A blank pair has group 0 and empty
/// buffers.
#[derive(Default)]
pub struct DhKeypair {
    group: u32,
    private: SecretBytes,
    public: Vec<u8>,
}

impl DhKeypair {
    pub fn new(group: u32, private: SecretBytes, public: Vec<u8>) -> Self {
        Self {
            group,
            private,
            public,
        }
    }

    pub fn group(&self) -> u32 {
        self.group
    }

    pub fn private(&self) -> &[u8] {
        &self.private
    }

    pub fn public(&self) -> &[u8] {
        &self.public
    }

    pub fn is_blank(&self) -> bool {
        self.group == 0 && self.private.is_empty() && self.public.is_empty()
    }

    /// Wipe the pair back to the blank state. Idempotent.
    pub fn release(&mut self) {
        self.group = 0;
        self.private.clear();
        self.public.clear();
    }
}

/// One derived-key slot: the symmetric keys protecting a single
/// (local generation, remote generation) combination.
pub struct SessionKeys {
    pub send_cipher: SecretBytes,
    pub recv_cipher: SecretBytes,
    pub send_mac: MacKey,
    pub recv_mac: MacKey,
}

impl SessionKeys {
    pub fn new(
        send_cipher: SecretBytes,
        recv_cipher: SecretBytes,
        send_mac: MacKey,
        recv_mac: MacKey,
    ) -> Self {
        Self {
            send_cipher,
            recv_cipher,
            send_mac,
            recv_mac,
        }
    }
}

fn parity(generation: u32) -> usize {
    (generation & 1) as usize
}

/// The 2×2 cache of derived session keys indexed by key-generation parity.
///
/// During a rotation's overlap window either end may still address either
/// of the other side's two latest generations, so up to four combinations
/// are live at once.
#[derive(Default)]
pub struct SessionKeyCache {
    slots: [[Option<SessionKeys>; 2]; 2],
}

impl SessionKeyCache {
    pub fn insert(&mut self, local_generation: u32, remote_generation: u32, keys: SessionKeys) {
        self.slots[parity(local_generation)][parity(remote_generation)] = Some(keys);
    }

    pub fn get(&self, local_generation: u32, remote_generation: u32) -> Option<&SessionKeys> {
        self.slots[parity(local_generation)][parity(remote_generation)].as_ref()
    }

    /// Remove one slot; its keys are wiped when the returned value drops.
    /// Idempotent on an empty slot.
    pub fn take(&mut self, local_generation: u32, remote_generation: u32) -> Option<SessionKeys> {
        self.slots[parity(local_generation)][parity(remote_generation)].take()
    }

    /// Drop all four slots. Idempotent.
    pub fn clear(&mut self) {
        for row in &mut self.slots {
            for slot in row {
                *slot = None;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().flatten().all(Option::is_none)
    }
}

/// All negotiated cryptographic state for one peer: the current and
/// superseded DH keypairs on both sides, the derived-key cache, the
/// session identifier, retired MAC keys held for later disclosure, and an
/// optional out-of-band pre-shared secret.
///
/// Superseded keypairs exist solely so traffic sent before the peer
/// observed a rotation can still be read; they must never originate new
/// messages.
#[derive(Default)]
pub struct KeyMaterial {
    local_generation: u32,
    local: DhKeypair,
    local_previous: DhKeypair,
    remote_generation: u32,
    remote_public: Option<Vec<u8>>,
    remote_public_previous: Option<Vec<u8>>,
    session_keys: SessionKeyCache,
    session_id: [u8; SESSION_ID_LEN],
    retired_mac_keys: Vec<MacKey>,
    preshared_secret: Option<SecretBytes>,
}

impl KeyMaterial {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Local keypair rotation ──────────────────────────────────────────

    /// Install a freshly generated local keypair; the current pair shifts
    /// into the superseded slot and the generation counter advances.
    pub fn install_local(&mut self, pair: DhKeypair) {
        self.local_previous = std::mem::replace(&mut self.local, pair);
        self.local_generation += 1;
    }

    pub fn local(&self) -> &DhKeypair {
        &self.local
    }

    pub fn local_previous(&self) -> &DhKeypair {
        &self.local_previous
    }

    pub fn local_generation(&self) -> u32 {
        self.local_generation
    }

    // ── Remote public value rotation ────────────────────────────────────

    /// Install the peer's latest public value; the current value shifts
    /// into the predecessor slot and the remote generation advances.
    pub fn install_remote(&mut self, public: Vec<u8>) {
        self.remote_public_previous = self.remote_public.take();
        self.remote_public = Some(public);
        self.remote_generation += 1;
    }

    pub fn remote_public(&self) -> Option<&[u8]> {
        self.remote_public.as_deref()
    }

    pub fn remote_public_previous(&self) -> Option<&[u8]> {
        self.remote_public_previous.as_deref()
    }

    pub fn remote_generation(&self) -> u32 {
        self.remote_generation
    }

    // ── Derived keys and session identifier ─────────────────────────────

    pub fn session_keys(&self) -> &SessionKeyCache {
        &self.session_keys
    }

    pub fn session_keys_mut(&mut self) -> &mut SessionKeyCache {
        &mut self.session_keys
    }

    pub fn set_session_id(&mut self, id: [u8; SESSION_ID_LEN]) {
        self.session_id = id;
    }

    pub fn session_id(&self) -> &[u8; SESSION_ID_LEN] {
        &self.session_id
    }

    // ── Retired MAC keys ────────────────────────────────────────────────

    /// Append MAC keys retired by a rotation, retained for voluntary
    /// disclosure.
    pub fn retire_mac_keys(&mut self, keys: impl IntoIterator<Item = MacKey>) {
        self.retired_mac_keys.extend(keys);
    }

    pub fn retired_mac_key_count(&self) -> usize {
        self.retired_mac_keys.len()
    }

    /// Hand out the retired keys for publication and clear the list.
    pub fn drain_retired_mac_keys(&mut self) -> Vec<MacKey> {
        std::mem::take(&mut self.retired_mac_keys)
    }

    // ── Pre-shared secret ───────────────────────────────────────────────

    /// Replace the out-of-band secret; the previous one is wiped. Empty
    /// input leaves the secret cleared.
    pub fn set_preshared_secret(&mut self, secret: &[u8]) {
        self.preshared_secret = None;
        if !secret.is_empty() {
            self.preshared_secret = Some(SecretBytes::from(secret));
        }
    }

    pub fn preshared_secret(&self) -> Option<&[u8]> {
        self.preshared_secret.as_deref()
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Wipe everything derived from or identifying the shared session:
    /// remote public values, the derived-key cache, the session identifier,
    /// retired MAC keys, and the pre-shared secret. The remote generation
    /// resets to 0. Local keypairs are untouched. Idempotent.
    pub fn wipe_remote(&mut self) {
        self.remote_generation = 0;
        self.remote_public = None;
        self.remote_public_previous = None;
        self.session_keys.clear();
        self.session_id = [0; SESSION_ID_LEN];
        self.retired_mac_keys.clear();
        self.preshared_secret = None;
    }

    /// Release both local keypairs and reset the local generation to 0.
    /// Idempotent.
    pub fn wipe_local(&mut self) {
        self.local_generation = 0;
        self.local.release();
        self.local_previous.release();
    }
}
