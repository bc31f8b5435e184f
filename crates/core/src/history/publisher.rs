//! Force-pushing the final lineage to the target repository.

use tracing::{info, instrument, warn};

use crate::errors::GitError;
use crate::git::HistoryStore;
use crate::models::ObjectId;
use crate::retry::RetryPolicy;

/// Local ref the published tip is staged under before pushing.
pub const PUBLISH_REF: &str = "refs/orgmimic/publish";

/// Pushes a tip onto a target repository's default branch.
pub struct BranchPublisher<'a, S: HistoryStore + ?Sized> {
    store: &'a S,
    retry: RetryPolicy,
}

impl<'a, S: HistoryStore + ?Sized> BranchPublisher<'a, S> {
    pub fn new(store: &'a S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Force-push `tip` to `refs/heads/<branch>` at `remote_url`.
    ///
    /// Transient transport failures are retried; the final failure is logged
    /// and returned for the caller to record.
    #[instrument(skip(self, remote_url), fields(tip = %tip.short()))]
    pub fn publish(&self, tip: &ObjectId, remote_url: &str, branch: &str) -> Result<(), GitError> {
        self.store.set_reference(PUBLISH_REF, tip)?;
        let remote_ref = format!("refs/heads/{}", branch);
        let pushed = self.retry.run("push", || {
            self.store.push(remote_url, PUBLISH_REF, &remote_ref, true)
        });
        match pushed {
            Ok(()) => {
                info!(branch, "published");
                Ok(())
            }
            Err(e) => {
                warn!(branch, error = %e, "unable to publish");
                Err(e)
            }
        }
    }
}
