//! Hourly star-count collection.
//!
//! Each run refreshes at most `⌈N/12⌉` extensions (N = snapshot size), so the whole catalog is
//! covered in about half a day even when some runs are missed. Extensions are processed one at a
//! time to keep VCS host usage predictable, and a run shrinks further when the client's request
//! budget is low. The set of extensions handled today lives in the collector and is lost on
//! restart.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::blob;
use crate::context::RegistryContext;
use crate::error::RegistryError;
use crate::github::parse_repo_url;
use crate::store;

/// Runs per day the quota is sized for; twice that many fit in a day.
const RUNS_TO_COVER_CATALOG: usize = 12;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StarsRunReport {
    /// Extensions whose star count was fetched in this run.
    pub refreshed: Vec<String>,
    /// Everything handled since the day started, this run included.
    pub collected_today: BTreeSet<String>,
}

/// Upper bound of extensions fetched by one run.
pub fn run_quota(total_extensions: usize) -> usize {
    total_extensions.div_ceil(RUNS_TO_COVER_CATALOG)
}

pub struct StarsCollector {
    ctx: RegistryContext,
    collected_today: BTreeSet<String>,
    day_started: DateTime<Utc>,
}

impl StarsCollector {
    pub fn new(ctx: RegistryContext) -> Self {
        let day_started = ctx.clock.now();
        StarsCollector {
            ctx,
            collected_today: BTreeSet::new(),
            day_started,
        }
    }

    pub fn collected_today(&self) -> &BTreeSet<String> {
        &self.collected_today
    }

    fn roll_day(&mut self) {
        let now = self.ctx.clock.now();
        if now - self.day_started >= Duration::hours(24) {
            info!(collected = self.collected_today.len(), "[STARS] New day, resetting collected set");
            self.collected_today.clear();
            self.day_started = now;
        }
    }

    pub async fn run(&mut self) -> Result<StarsRunReport, RegistryError> {
        self.roll_day();
        let registry = blob::read_registry(self.ctx.snapshots.as_ref(), &self.ctx.config)
            .await
            .map_err(|e| RegistryError::internal("reading registry snapshot", e))?;

        let quota = run_quota(registry.len()).min(self.budget());
        let mut candidates = Vec::new();
        for (id, entry) in &registry {
            if self.collected_today.contains(id) {
                continue;
            }
            let repo = entry
                .get("ownerRepo")
                .and_then(|v| v.as_str())
                .and_then(parse_repo_url);
            match repo {
                Some((owner, repo)) => candidates.push((id.clone(), owner, repo)),
                None => {
                    debug!(extension = %id, "[STARS] No linked repository, nothing to fetch");
                    self.collected_today.insert(id.clone());
                }
            }
        }
        info!(
            total = registry.len(),
            candidates = candidates.len(),
            quota,
            "[STARS] Collecting star counts"
        );

        let mut refreshed = Vec::new();
        for (id, owner, repo) in candidates.into_iter().take(quota) {
            if self.refresh_one(&id, &owner, &repo).await {
                refreshed.push(id.clone());
            }
            // Attempted counts as collected, failures are retried tomorrow.
            self.collected_today.insert(id);
        }

        info!(
            refreshed = refreshed.len(),
            collected_today = self.collected_today.len(),
            "[STARS] Run finished"
        );
        Ok(StarsRunReport {
            refreshed,
            collected_today: self.collected_today.clone(),
        })
    }

    fn budget(&self) -> usize {
        usize::try_from(self.ctx.vcs.remaining_budget()).unwrap_or(usize::MAX)
    }

    /// Fetches one star count and writes it if it changed. `true` when the fetch succeeded.
    async fn refresh_one(&self, id: &str, owner: &str, repo: &str) -> bool {
        let stars = match self.ctx.vcs.get_repo(owner, repo).await {
            Ok(Some(info)) => info.star_count,
            Ok(None) => {
                warn!(extension = %id, owner, repo, "[STARS] Repository no longer exists");
                return false;
            }
            Err(e) => {
                warn!(extension = %id, error = %e, "[STARS] Failed to fetch repository");
                return false;
            }
        };

        let doc = match store::get_extension(self.ctx.docs.as_ref(), &self.ctx.config, id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!(extension = %id, "[STARS] Extension document missing");
                return true;
            }
            Err(e) => {
                warn!(extension = %id, error = %e, "[STARS] Failed to read extension document");
                return true;
            }
        };
        if doc.star_count == stars {
            debug!(extension = %id, stars, "[STARS] Unchanged");
            return true;
        }
        let Some(document_id) = doc.document_id.as_deref() else {
            warn!(extension = %id, "[STARS] Extension document has no id");
            return true;
        };

        // A field-level delta leaves the rest of the document, download counts included, untouched.
        let delta = stars as i64 - doc.star_count as i64;
        match self
            .ctx
            .docs
            .increment(&self.ctx.config.extensions_table, document_id, "starCount", delta)
            .await
        {
            Ok(()) => debug!(extension = %id, stars, delta, "[STARS] Star count updated"),
            Err(e) => warn!(extension = %id, error = %e, "[STARS] Failed to write star count"),
        }
        true
    }
}
