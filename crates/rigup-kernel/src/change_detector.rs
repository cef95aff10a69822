//! [`ChangeDetector`] – decides whether the dependency install can be skipped.
//!
//! The manifest (lockfile) is hashed with SHA-256 and compared against the
//! fingerprint recorded by the last *successful* install.  Decision order:
//!
//! 1. manifest absent → install ([`InstallDecision::ManifestMissing`])
//! 2. no recorded fingerprint → install ([`InstallDecision::FirstRun`])
//! 3. fingerprints differ → install ([`InstallDecision::Changed`])
//! 4. otherwise → skip ([`InstallDecision::Unchanged`])
//!
//! [`ChangeDetector::record_success`] is the only writer of the fingerprint
//! file and must be called only after the install has been verified.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rigup_hal::shell_quote;
use rigup_types::RigError;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Hex SHA-256 of `path`'s contents, or `None` when it does not exist.
pub fn fingerprint_file(path: &Path) -> Result<Option<String>, RigError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).map_err(|e| {
        RigError::io(path, &e).with_remedy([format!("chmod u+r {}", shell_quote(&path.display().to_string()))])
    })?;
    Ok(Some(format!("{:x}", Sha256::digest(&bytes))))
}

/// The marker file holding the fingerprint of the last successful install.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    path: PathBuf,
}

impl FingerprintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded fingerprint, `None` when the marker is absent or empty.
    pub fn load(&self) -> Result<Option<String>, RigError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            RigError::io(&self.path, &e).with_remedy([format!("rm -f {}", shell_quote(&self.path.display().to_string()))])
        })?;
        let trimmed = raw.trim();
        Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
    }

    /// Replace the recorded fingerprint.  Written to a sibling temp file and
    /// renamed into place so a crash never leaves a half-written marker.
    pub fn save(&self, fingerprint: &str) -> Result<(), RigError> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        // Usually a state dir left behind by a `sudo rigup`.
        let reclaim = |err: RigError| {
            err.with_remedy([format!("sudo chown -R \"$USER\" {}", shell_quote(&dir.display().to_string()))])
        };
        fs::create_dir_all(dir).map_err(|e| reclaim(RigError::io(dir, &e)))?;
        let tmp = self.path.with_extension("tmp");
        fs::File::create(&tmp)
            .and_then(|mut f| {
                f.write_all(fingerprint.as_bytes())?;
                f.write_all(b"\n")?;
                f.sync_all()
            })
            .map_err(|e| reclaim(RigError::io(&tmp, &e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| reclaim(RigError::io(&self.path, &e)))
    }
}

/// Outcome of comparing the manifest against the recorded fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallDecision {
    ManifestMissing,
    FirstRun { current: String },
    Changed { previous: String, current: String },
    Unchanged { current: String },
}

impl InstallDecision {
    pub fn install_required(&self) -> bool {
        !matches!(self, InstallDecision::Unchanged { .. })
    }

    /// The manifest fingerprint this decision was made against.
    pub fn current(&self) -> Option<&str> {
        match self {
            InstallDecision::ManifestMissing => None,
            InstallDecision::FirstRun { current }
            | InstallDecision::Changed { current, .. }
            | InstallDecision::Unchanged { current } => Some(current),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            InstallDecision::ManifestMissing => "manifest missing",
            InstallDecision::FirstRun { .. } => "first install",
            InstallDecision::Changed { .. } => "manifest changed",
            InstallDecision::Unchanged { .. } => "unchanged",
        }
    }
}

/// Compares a dependency manifest against its [`FingerprintStore`].
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    manifest: PathBuf,
    store: FingerprintStore,
}

impl ChangeDetector {
    pub fn new(manifest: impl Into<PathBuf>, store: FingerprintStore) -> Self {
        Self {
            manifest: manifest.into(),
            store,
        }
    }

    pub fn manifest(&self) -> &Path {
        &self.manifest
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// Decide whether an install is required.  Read-only.
    pub fn check(&self) -> Result<InstallDecision, RigError> {
        let Some(current) = fingerprint_file(&self.manifest)? else {
            return Ok(InstallDecision::ManifestMissing);
        };
        let decision = match self.store.load()? {
            None => InstallDecision::FirstRun { current },
            Some(previous) if previous != current => InstallDecision::Changed { previous, current },
            Some(_) => InstallDecision::Unchanged { current },
        };
        debug!(manifest = %self.manifest.display(), decision = decision.reason(), "fingerprint checked");
        Ok(decision)
    }

    /// Persist the fingerprint `decision` was made against.  Call only after a
    /// verified install.  A decision without a fingerprint (manifest missing)
    /// leaves the store untouched.
    pub fn record_success(&self, decision: &InstallDecision) -> Result<(), RigError> {
        match decision.current() {
            Some(current) => self.store.save(current),
            None => Ok(()),
        }
    }
}
