use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// API credentials handed to the remote stages.
///
/// The secret is never printed: `Debug` and `Display` are redacted and the
/// type is intentionally not serializable.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Borrow the raw secret for building an auth header.
    pub fn expose_secret(&self) -> &str {
        &self.api_key
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(***)")
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// One end-to-end request: a source to digest plus the credentials to do it.
#[derive(Debug, Clone)]
pub struct Job {
    id: Uuid,
    source: String,
    credentials: Credentials,
    created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(source: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            credentials,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// URL or local path of the media to fetch.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_are_redacted() {
        let job = Job::new("https://youtu.be/abc", Credentials::new("sk-secret"));
        let debug = format!("{:?}", job);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("Credentials(***)"));
        assert_eq!(job.credentials().to_string(), "***");
        assert_eq!(job.credentials().expose_secret(), "sk-secret");
    }

    #[test]
    fn test_jobs_get_distinct_ids() {
        let a = Job::new("a.mp4", Credentials::new("k"));
        let b = Job::new("a.mp4", Credentials::new("k"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_blank_credentials() {
        assert!(Credentials::new("  ").is_empty());
        assert!(!Credentials::new("sk").is_empty());
    }
}
