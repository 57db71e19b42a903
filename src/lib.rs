//! # inventory-sync
//!
//! Keeps an Elasticsearch index of computers in step with two systems of
//! record: OCS Inventory (MySQL) and Active Directory (LDAP).
//!
//! Each cycle pulls both sources, merges them by normalized computer name,
//! derives inactivity flags per source, deletes index documents that no
//! longer correspond to any computer, and upserts the merged set.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐
//! │ OCS (MySQL) │──┐
//! └─────────────┘  │   ┌───────────┐   ┌──────────────┐
//!                  ├──▶│ reconcile │──▶│ sync engine  │──▶ Elasticsearch
//! ┌─────────────┐  │   │  (core)   │   │ delete+upsert│
//! │  AD (LDAP)  │──┘   └───────────┘   └──────────────┘
//! └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! invsync init                  # create the index with its mapping
//! invsync sources               # check database, directory, index
//! invsync sync --dry-run        # show what a cycle would change
//! invsync run                   # cycle every sync.interval_secs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Classified source errors |
//! | [`traits`] | `AssetSource` / `DirectorySource` |
//! | [`db`] | MySQL pool |
//! | [`connector_ocs`] | OCS Inventory connector |
//! | [`connector_ad`] | Active Directory connector |
//! | [`report`] | Export file loading and the directory report parser |
//! | [`sink_elastic`] | Elasticsearch sink |
//! | [`migrate`] | Index creation |
//! | [`sources`] | Health listing |
//! | [`sync`] | Cycle orchestration and the service loop |
//!
//! Merge logic, models, and the sink trait live in `inventory-sync-core`.

pub mod config;
pub mod connector_ad;
pub mod connector_ocs;
pub mod db;
pub mod error;
pub mod migrate;
pub mod report;
pub mod sink_elastic;
pub mod sources;
pub mod sync;
pub mod traits;
