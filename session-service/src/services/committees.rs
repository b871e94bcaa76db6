use service_core::utils::with_timeout;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::backend::MembershipStore;
use super::error::BackendError;
use crate::models::CommitteeMembership;

/// Active committee seats for a user, bounded by a single deadline.
#[derive(Clone)]
pub struct CommitteeLoader {
    store: Arc<dyn MembershipStore>,
    timeout: Duration,
}

impl CommitteeLoader {
    pub fn new(store: Arc<dyn MembershipStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn load(&self, user_id: &str) -> Result<Vec<CommitteeMembership>, BackendError> {
        let committees = with_timeout(self.timeout, self.store.committee_memberships(user_id)).await?;
        debug!(user_id, count = committees.len(), "Loaded committee memberships");
        Ok(committees)
    }
}
