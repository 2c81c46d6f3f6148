use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{project_key, LeaseError, LeaseStore, RenameLease};

#[derive(Debug)]
struct Held {
    lease: RenameLease,
    deadline: Instant,
}

/// Process-local lease store.
///
/// Expiry is tracked on the tokio clock, so tests may pause and advance time.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<String, Held>>,
}

impl MemoryLeaseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for the project containing `path`.
    ///
    /// Any lease already held for that project is replaced.
    pub fn acquire(&self, path: &str, ttl: Duration) -> RenameLease {
        let lease = RenameLease::new(path, ttl);
        let deadline = Instant::now()
            .checked_add(ttl)
            .unwrap_or_else(far_future);

        let previous = self.leases.lock().insert(
            lease.project_path.clone(),
            Held {
                lease: lease.clone(),
                deadline,
            },
        );
        if let Some(previous) = previous {
            tracing::warn!(
                project = %lease.project_path,
                replaced = %previous.lease.token,
                "rename lease replaced an existing holder"
            );
        }

        lease
    }

    /// Give up a lease. Returns `false` if `token` no longer holds it.
    pub fn release(&self, path: &str, token: Uuid) -> bool {
        let mut leases = self.leases.lock();
        let key = project_key(path);
        match leases.get(key) {
            Some(held) if held.lease.token == token => {
                leases.remove(key);
                true
            }
            _ => false,
        }
    }
}

fn far_future() -> Instant {
    // Roughly thirty years, well inside what every platform's Instant can hold.
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

#[async_trait::async_trait]
impl LeaseStore for MemoryLeaseStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, project: &str) -> Result<Option<RenameLease>, LeaseError> {
        let key = project_key(project);
        let mut leases = self.leases.lock();
        match leases.get(key) {
            Some(held) if held.deadline > Instant::now() => Ok(Some(held.lease.clone())),
            Some(_) => {
                leases.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
