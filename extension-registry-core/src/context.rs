use std::sync::Arc;

use crate::config::RegistryConfig;
use crate::contract::{Clock, DocumentStore, SnapshotStore, VcsHost};
use crate::notify::Notifier;

/// Handles to every collaborator of the core, built once at process start.
#[derive(Clone)]
pub struct RegistryContext {
    pub docs: Arc<dyn DocumentStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub vcs: Arc<dyn VcsHost>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<RegistryConfig>,
    pub notifier: Notifier,
}

impl RegistryContext {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        snapshots: Arc<dyn SnapshotStore>,
        vcs: Arc<dyn VcsHost>,
        clock: Arc<dyn Clock>,
        config: RegistryConfig,
        notifier: Notifier,
    ) -> Self {
        RegistryContext {
            docs,
            snapshots,
            vcs,
            clock,
            config: Arc::new(config),
            notifier,
        }
    }
}
