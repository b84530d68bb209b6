//! Identity link store contract
//!
//! Implementations must run each mutating operation as one atomic
//! read-modify-write against the backing store. Two concurrent `link`
//! calls for the same pubkey serialize: exactly one creates the record and
//! the other observes it.

use crate::{IdentityLink, PubKey, Result, SubjectId};

pub trait IdentityLinkStore: Send + Sync {
    /// Bind `pubkey` to `subject`, creating or reactivating the link.
    ///
    /// Idempotent for an active link to the same subject; fails with
    /// `LinkConflict` when the key is actively bound elsewhere.
    fn link(&self, pubkey: &PubKey, subject: &SubjectId) -> Result<IdentityLink>;

    /// Deactivate the link. Fails with `UnknownPrincipal`, `NotOwner` or
    /// `AlreadyUnlinked`.
    fn unlink(&self, pubkey: &PubKey, subject: &SubjectId) -> Result<IdentityLink>;

    /// Subject of an active link. `UnknownPrincipal` when no record exists,
    /// `InactiveAccount` when the record is inactive.
    fn resolve(&self, pubkey: &PubKey) -> Result<SubjectId>;

    /// All active links bound to `subject`
    fn list_active(&self, subject: &SubjectId) -> Result<Vec<IdentityLink>>;

    /// Best-effort `last_used_at` update for the usage recorder
    fn touch(&self, pubkey: &PubKey) -> Result<()>;
}
