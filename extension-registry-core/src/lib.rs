#![doc = "extension-registry-core: release intake, snapshot synchronisation and background workers of the extension registry."]

//! The registry keeps one authoritative document per extension in an external document store and
//! publishes a read-optimised snapshot (`registry.json`, `popularity.json`,
//! `registry_version.json`) to a blob bucket.
//!
//! # Navigation
//! - External collaborators: [`contract`] (traits), [`store`], [`blob`], [`github`]
//! - Publishing a release: [`release::publish_release`]
//! - Store → snapshot: [`synchronise::synchronise`]
//! - Background jobs: [`popularity`], [`stars`], [`scheduler`]
//! - Admin operations: [`downloads`], [`ownership`], [`backup`], [`setup`]

pub mod archive;
pub mod backup;
pub mod blob;
pub mod clock;
pub mod config;
pub mod context;
pub mod contract;
pub mod downloads;
pub mod error;
pub mod github;
pub mod model;
pub mod notify;
pub mod ownership;
pub mod popularity;
pub mod release;
pub mod scheduler;
pub mod setup;
pub mod stars;
pub mod store;
pub mod synchronise;
pub mod trim;

pub use context::RegistryContext;
pub use error::{ErrorKind, RegistryError};
