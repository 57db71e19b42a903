//! Source traits.
//!
//! The sync driver pulls records through these two traits and never talks
//! to MySQL or LDAP directly. Production implementations live in
//! [`connector_ocs`](crate::connector_ocs) and
//! [`connector_ad`](crate::connector_ad); tests substitute in-process fakes.
//!
//! ```text
//!  AssetSource ─────┐
//!  (OCS / MySQL)    │
//!                   ├──▶ reconcile::merge ──▶ IndexSink
//!  DirectorySource ─┘
//!  (AD / LDAP)
//! ```

use async_trait::async_trait;
use inventory_sync_core::models::{AdRecord, OcsRecord};

use crate::error::SourceError;

/// Asset-management store (OCS Inventory).
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Short label used in logs and `invsync sources`.
    fn name(&self) -> &str;

    /// Every known asset. `limit = 0` means no limit.
    async fn list_assets(&self, limit: usize) -> Result<Vec<OcsRecord>, SourceError>;
}

/// Directory service (Active Directory).
#[async_trait]
pub trait DirectorySource: Send + Sync {
    fn name(&self) -> &str;

    /// Every computer object under the configured search base.
    async fn list_computers(&self) -> Result<Vec<AdRecord>, SourceError>;

    /// Drop the current session and establish a new one.
    ///
    /// Called by the driver after a [`SourceError::Connectivity`] failure,
    /// before the single retry.
    async fn reconnect(&self) -> Result<(), SourceError>;
}
