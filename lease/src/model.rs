use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalise a repository path to the key its rename lease is held under.
///
/// A rename moves a whole top-level namespace, so every repository below
/// `acme/` shares the lease for `acme`.
///
/// ```
/// assert_eq!(lease::project_key("acme/widgets/api"), "acme");
/// assert_eq!(lease::project_key("/acme/"), "acme");
/// ```
pub fn project_key(path: &str) -> &str {
    let trimmed = path.trim_matches('/');
    trimmed.split('/').next().unwrap_or(trimmed)
}

/// A TTL-bound marker that a project is mid-relocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameLease {
    /// Project key, as produced by [`project_key`].
    pub project_path: String,

    /// When the lease was taken.
    pub acquired_at: DateTime<Utc>,

    /// How long the lease lives after `acquired_at`.
    pub ttl: Duration,

    /// Identifies the holder, for release.
    pub token: Uuid,
}

impl RenameLease {
    /// A fresh lease for the project containing `path`, starting now.
    pub fn new(path: &str, ttl: Duration) -> Self {
        Self {
            project_path: project_key(path).to_owned(),
            acquired_at: Utc::now(),
            ttl,
            token: Uuid::new_v4(),
        }
    }

    /// Wall-clock time at which the lease lapses.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::TimeDelta::MAX);
        self.acquired_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the lease has lapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_key_takes_top_level_namespace() {
        assert_eq!(project_key("foo/bar"), "foo");
        assert_eq!(project_key("foo"), "foo");
        assert_eq!(project_key("foo/bar/baz/qux"), "foo");
        assert_eq!(project_key(""), "");
    }

    #[test]
    fn lease_expiry() {
        let mut lease = RenameLease::new("foo/bar", Duration::from_secs(30));
        assert_eq!(lease.project_path, "foo");

        let now = Utc::now();
        lease.acquired_at = now - chrono::Duration::seconds(10);
        assert!(!lease.is_expired_at(now));

        lease.acquired_at = now - chrono::Duration::seconds(30);
        assert!(lease.is_expired_at(now));
    }

    #[test]
    fn huge_ttl_never_overflows() {
        let lease = RenameLease::new("foo", Duration::MAX);
        assert!(!lease.is_expired_at(Utc::now()));
    }

    #[test]
    fn lease_json_shape() {
        let lease = RenameLease::new("foo", Duration::from_millis(1500));
        let json = serde_json::to_value(&lease).unwrap();
        assert_eq!(json["project_path"], "foo");
        assert_eq!(json["ttl"]["secs"], 1);
        let back: RenameLease = serde_json::from_value(json).unwrap();
        assert_eq!(back, lease);
    }
}
