use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// Errors surfaced by the context store.
///
/// Policy refusals (forgetting an in-use context or fingerprint) are not
/// errors; they come back as ordinary return values so callers can treat
/// them as expected outcomes.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("identity, account, and protocol must all be non-empty")]
    EmptyContextKey,

    #[error("fingerprint {0} is not known in this context")]
    UnknownFingerprint(Fingerprint),
}
