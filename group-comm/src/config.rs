//! Process configuration: identity validation, log directory, fault injection.
//!
//! Everything here is resolved once at startup (or, for the log directory,
//! until the peer starts operating) and carries no protocol logic.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::fault::FaultInjector;
use crate::group::{Group, PeerAddress, PeerId};
use crate::timer::RetryPolicy;

/// Log directory used when none (or an invalid one) is given.
pub const DEFAULT_LOG_DIR: &str = "log/";

/// Upper bound on broadcasts (direct and relay) running at the same time.
pub const DEFAULT_MAX_CONCURRENT_BROADCASTS: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read group configuration {path:?}: {source}")]
    GroupFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed group configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("group configuration lists no peers")]
    EmptyGroup,
    #[error("peer id {0} appears more than once in the group")]
    DuplicatePeer(PeerId),
    #[error("invalid peer id and port combination: {id}/{port} is not in the group")]
    UnknownPeer { id: PeerId, port: u16 },
    #[error("invalid directory {0:?}: the folder must end with '/'")]
    LogDirSuffix(String),
    #[error("failed to create directory {path:?}: {source}")]
    LogDirUncreatable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Path for this session already set")]
    LogDirLocked,
}

/// Validate a candidate log directory.
///
/// The path must end with `/`.  A directory that does not exist yet must be
/// creatable; the probe creates and removes it again.
pub fn check_log_dir(candidate: &str) -> Result<PathBuf, ConfigError> {
    if !candidate.ends_with('/') {
        return Err(ConfigError::LogDirSuffix(candidate.to_string()));
    }
    let path = PathBuf::from(candidate);
    if !path.exists() {
        std::fs::create_dir(&path)
            .and_then(|()| std::fs::remove_dir(&path))
            .map_err(|source| ConfigError::LogDirUncreatable {
                path: path.clone(),
                source,
            })?;
    }
    Ok(path)
}

/// Log directory that may change until the peer starts operating.
#[derive(Debug, Clone)]
pub struct LogSettings {
    dir: PathBuf,
    locked: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            locked: false,
        }
    }
}

impl LogSettings {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Fails once the directory is locked; callers check this before
    /// asking for a new path.
    pub fn ensure_unlocked(&self) -> Result<(), ConfigError> {
        if self.locked {
            return Err(ConfigError::LogDirLocked);
        }
        Ok(())
    }

    /// Switch to `candidate` if it validates and the directory is not locked.
    ///
    /// On error the previous directory stays in effect.
    pub fn change(&mut self, candidate: &str) -> Result<&Path, ConfigError> {
        self.ensure_unlocked()?;
        self.dir = check_log_dir(candidate)?;
        Ok(self.dir.as_path())
    }

    /// Freeze the directory (the peer started listening or sending) and make
    /// sure it exists.
    pub fn lock(&mut self) -> Result<&Path, ConfigError> {
        self.locked = true;
        std::fs::create_dir_all(&self.dir).map_err(|source| ConfigError::LogDirUncreatable {
            path: self.dir.clone(),
            source,
        })?;
        Ok(self.dir.as_path())
    }
}

/// Everything a [`crate::middleware::Middleware`] needs to start.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This peer's own group entry.
    pub local: PeerAddress,
    pub group: Group,
    pub fault: Option<FaultInjector>,
    pub retry: RetryPolicy,
    pub max_concurrent_broadcasts: usize,
}

impl NodeConfig {
    /// Resolve `(peer_id, port)` against the group.  A mismatch is fatal.
    pub fn new(group: Group, peer_id: PeerId, port: u16) -> Result<Self, ConfigError> {
        let local = group.find(peer_id, port)?;
        Ok(Self {
            local,
            group,
            fault: None,
            retry: RetryPolicy::default(),
            max_concurrent_broadcasts: DEFAULT_MAX_CONCURRENT_BROADCASTS,
        })
    }

    pub fn with_fault(mut self, fault: Option<FaultInjector>) -> Self {
        self.fault = fault;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent_broadcasts(mut self, n: usize) -> Self {
        self.max_concurrent_broadcasts = n.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Group {
        Group::new(vec![PeerAddress::new(1, 5000), PeerAddress::new(2, 5001)]).unwrap()
    }

    #[test]
    fn node_config_resolves_local_entry() {
        let cfg = NodeConfig::new(group(), 2, 5001).unwrap();
        assert_eq!(cfg.local, PeerAddress::new(2, 5001));
        assert!(cfg.fault.is_none());
    }

    #[test]
    fn node_config_rejects_mismatched_port() {
        assert!(matches!(
            NodeConfig::new(group(), 1, 5001),
            Err(ConfigError::UnknownPeer { id: 1, port: 5001 })
        ));
    }

    #[test]
    fn concurrency_bound_is_at_least_one() {
        let cfg = NodeConfig::new(group(), 1, 5000)
            .unwrap()
            .with_max_concurrent_broadcasts(0);
        assert_eq!(cfg.max_concurrent_broadcasts, 1);
    }

    #[test]
    fn log_dir_must_end_with_slash() {
        assert!(matches!(
            check_log_dir("logs"),
            Err(ConfigError::LogDirSuffix(_))
        ));
    }

    #[test]
    fn creatable_log_dir_is_probed_not_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let candidate = format!("{}/fresh/", tmp.path().display());
        let path = check_log_dir(&candidate).unwrap();
        assert_eq!(path, PathBuf::from(&candidate));
        assert!(!path.exists());
    }

    #[test]
    fn uncreatable_log_dir_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let candidate = format!("{}/missing/parent/", tmp.path().display());
        assert!(matches!(
            check_log_dir(&candidate),
            Err(ConfigError::LogDirUncreatable { .. })
        ));
    }

    #[test]
    fn change_is_rejected_after_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let first = format!("{}/a/", tmp.path().display());
        let second = format!("{}/b/", tmp.path().display());

        let mut settings = LogSettings::default();
        settings.change(&first).unwrap();
        settings.lock().unwrap();
        assert!(settings.dir().exists());

        assert!(matches!(
            settings.change(&second),
            Err(ConfigError::LogDirLocked)
        ));
        assert_eq!(settings.dir(), Path::new(&first));
    }

    #[test]
    fn lock_is_reported_before_any_path_is_given() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = LogSettings::default();
        assert!(settings.ensure_unlocked().is_ok());
        settings.change(&format!("{}/c/", tmp.path().display())).unwrap();
        settings.lock().unwrap();

        let err = settings.ensure_unlocked().unwrap_err();
        assert!(matches!(err, ConfigError::LogDirLocked));
        assert_eq!(format!("{err}!"), "Path for this session already set!");
    }

    #[test]
    fn invalid_change_keeps_previous_dir() {
        let mut settings = LogSettings::default();
        assert!(settings.change("no-slash").is_err());
        assert_eq!(settings.dir(), Path::new(DEFAULT_LOG_DIR));
    }
}
