//! Known public-key fingerprints for one peer, with trust annotations.
//!
//! A context keeps every fingerprint it has ever seen for its peer, most
//! recently added first. Entries carry a free-form trust label set by the
//! verification layer (manual confirmation or the shared-secret proof).

use std::fmt;

/// Bytes in a public-key fingerprint.
pub const FINGERPRINT_LEN: usize = 20;

/// A 20-byte digest identifying a peer's long-term public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub const fn new(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a byte slice; `None` unless it is exactly 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; FINGERPRINT_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl From<[u8; FINGERPRINT_LEN]> for Fingerprint {
    fn from(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Fingerprint {
    /// The human-readable form: five space-separated groups of eight
    /// upper-case hex digits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, chunk) in self.0.chunks(4).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            for byte in chunk {
                write!(f, "{byte:02X}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// A known fingerprint and the trust annotation attached to it.
#[derive(Debug, Clone)]
pub struct FingerprintEntry {
    fingerprint: Fingerprint,
    trust: Option<String>,
}

impl FingerprintEntry {
    fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            trust: None,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn trust(&self) -> Option<&str> {
        self.trust.as_deref()
    }

    /// A fingerprint counts as trusted when it carries a non-empty label.
    pub fn is_trusted(&self) -> bool {
        self.trust.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// The fingerprints seen for one peer, most recently added first.
///
/// Values are pairwise distinct; lookups are linear 20-byte scans and
/// removal is by value.
#[derive(Debug, Default)]
pub struct FingerprintStore {
    entries: Vec<FingerprintEntry>,
}

impl FingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, fingerprint: Fingerprint) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.fingerprint == fingerprint)
    }

    pub fn find(&self, fingerprint: Fingerprint) -> Option<&FingerprintEntry> {
        self.entries.iter().find(|e| e.fingerprint == fingerprint)
    }

    /// Look up `fingerprint`, adding a fresh untrusted entry in front when
    /// missing and `add_if_missing` is set. Returns the entry and whether
    /// it was added.
    pub fn find_or_add(
        &mut self,
        fingerprint: Fingerprint,
        add_if_missing: bool,
    ) -> Option<(&mut FingerprintEntry, bool)> {
        if let Some(idx) = self.position(fingerprint) {
            return Some((&mut self.entries[idx], false));
        }
        if !add_if_missing {
            return None;
        }
        self.entries.insert(0, FingerprintEntry::new(fingerprint));
        Some((&mut self.entries[0], true))
    }

    /// Replace the trust label; `None` clears it. Returns false (and does
    /// nothing) on an unknown entry.
    pub fn set_trust(&mut self, fingerprint: Fingerprint, trust: Option<&str>) -> bool {
        match self.position(fingerprint) {
            Some(idx) => {
                self.entries[idx].trust = trust.map(str::to_owned);
                true
            }
            None => false,
        }
    }

    /// Remove an entry by value. Returns false on an unknown entry.
    pub fn remove(&mut self, fingerprint: Fingerprint) -> bool {
        match self.position(fingerprint) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FingerprintEntry> {
        self.entries.iter()
    }
}
