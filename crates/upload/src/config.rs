//! Immutable session configuration handed to the coordinator.

use std::time::Duration;

use packdrop_protocol::constants::DEFAULT_PART_SIZE;

use crate::error::UploadError;
use crate::retry::RetryPolicy;

/// Default cap on concurrently uploading parts of one file.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Authenticated identity used for team-scoped calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_token: String,
    pub team_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_token", &"<redacted>")
            .field("team_id", &self.team_id)
            .finish()
    }
}

/// Everything the coordinator needs from its environment.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub credentials: Credentials,
    /// Fixed part size in bytes.
    pub part_size: u64,
    /// Upper bound on parts in flight per file.
    pub max_concurrency: usize,
    /// Timeout for registration, URL issuance and finalize calls.
    pub request_timeout: Duration,
    /// Timeout for a single part PUT.
    pub part_timeout: Duration,
    pub retry: RetryPolicy,
}

impl SessionConfig {
    /// Creates a configuration with default sizing, timeouts and retries.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            part_size: DEFAULT_PART_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            request_timeout: Duration::from_secs(60),
            part_timeout: Duration::from_secs(15 * 60),
            retry: RetryPolicy::default(),
        }
    }

    /// Rejects configurations no upload could succeed with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.credentials.user_token.trim().is_empty() {
            return Err(UploadError::Config("missing user token".into()));
        }
        if self.credentials.team_id.trim().is_empty() {
            return Err(UploadError::Config("missing team id".into()));
        }
        if self.part_size == 0 {
            return Err(UploadError::Config(
                "part size must be greater than zero".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(UploadError::Config(
                "max concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Workers to use for a file of `part_count` parts.
    pub fn workers_for(&self, part_count: u32) -> usize {
        self.max_concurrency
            .min(part_count as usize)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            user_token: "tok".into(),
            team_id: "team-1".into(),
        }
    }

    #[test]
    fn defaults() {
        let config = SessionConfig::new(creds());
        assert_eq!(config.part_size, 100 * 1024 * 1024);
        assert_eq!(config.max_concurrency, 8);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_missing_credentials() {
        let mut config = SessionConfig::new(creds());
        config.credentials.user_token = " ".into();
        assert!(matches!(config.validate(), Err(UploadError::Config(_))));

        let mut config = SessionConfig::new(creds());
        config.credentials.team_id.clear();
        assert!(matches!(config.validate(), Err(UploadError::Config(_))));
    }

    #[test]
    fn rejects_zero_part_size() {
        let mut config = SessionConfig::new(creds());
        config.part_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn workers_bounded_by_part_count() {
        let config = SessionConfig::new(creds());
        assert_eq!(config.workers_for(1), 1);
        assert_eq!(config.workers_for(3), 3);
        assert_eq!(config.workers_for(500), 8);
    }

    #[test]
    fn debug_redacts_token() {
        let dbg = format!("{:?}", creds());
        assert!(!dbg.contains("tok\""));
        assert!(dbg.contains("redacted"));
    }
}
