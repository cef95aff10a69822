//! [`CapabilityManager`] – which external tools this machine offers.
//!
//! Before a reconciler that needs `docker` or the task runner is invoked,
//! call [`CapabilityManager::check`].  A missing tool yields
//! [`RigError::MissingCapability`] with the command that installs it; the
//! reconciler must not run.

use std::collections::HashSet;

use rigup_types::{Capability, RigError};

/// Set of capabilities known to be present.
///
/// # Example
///
/// ```
/// use rigup_kernel::capability::CapabilityManager;
/// use rigup_types::Capability;
///
/// let mut mgr = CapabilityManager::new();
/// mgr.grant(Capability::Tool("docker".into()));
///
/// assert!(mgr.check(&Capability::Tool("docker".into())).is_ok());
/// assert!(mgr.check(&Capability::PrivilegeEscalation).is_err());
/// ```
#[derive(Debug, Default)]
pub struct CapabilityManager {
    present: HashSet<Capability>,
}

impl CapabilityManager {
    /// Create an empty manager; nothing is considered present.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up each of `tools` on `PATH` and record the ones found.
    pub fn detect<'a>(tools: impl IntoIterator<Item = &'a str>, escalation: bool) -> Self {
        let mut mgr = Self::new();
        for tool in tools {
            if which::which(tool).is_ok() {
                mgr.grant(Capability::Tool(tool.to_string()));
            }
        }
        if escalation {
            mgr.grant(Capability::PrivilegeEscalation);
        }
        mgr
    }

    /// Mark `cap` as present.  Duplicate grants are ignored.
    pub fn grant(&mut self, cap: Capability) {
        self.present.insert(cap);
    }

    /// Mark `cap` as absent.  No-op if it was never granted.
    pub fn revoke(&mut self, cap: &Capability) {
        self.present.remove(cap);
    }

    pub fn has(&self, cap: &Capability) -> bool {
        self.present.contains(cap)
    }

    /// `Ok(())` when `cap` is present, [`RigError::MissingCapability`]
    /// otherwise.
    pub fn check(&self, cap: &Capability) -> Result<(), RigError> {
        if self.has(cap) {
            Ok(())
        } else {
            Err(RigError::MissingCapability {
                capability: cap.clone(),
                remedy: install_hint(cap),
            })
        }
    }
}

/// Commands that make `cap` available.
fn install_hint(cap: &Capability) -> Vec<String> {
    match cap {
        Capability::PrivilegeEscalation => vec!["su -c 'apt-get install -y sudo'".to_string()],
        Capability::Tool(tool) => match tool.as_str() {
            "docker" => vec!["curl -fsSL https://get.docker.com | sh".to_string()],
            "fnm" => vec!["curl -fsSL https://fnm.vercel.app/install | bash".to_string()],
            "task" => vec![
                "sh -c \"$(curl --location https://taskfile.dev/install.sh)\" -- -d -b ~/.local/bin"
                    .to_string(),
            ],
            "corepack" => vec!["npm install -g corepack".to_string()],
            other => vec![format!("command -v {other}")],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_and_check_passes() {
        let mut mgr = CapabilityManager::new();
        mgr.grant(Capability::Tool("task".into()));
        assert!(mgr.check(&Capability::Tool("task".into())).is_ok());
    }

    #[test]
    fn missing_tool_carries_install_hint() {
        let mgr = CapabilityManager::new();
        let err = mgr.check(&Capability::Tool("docker".into())).unwrap_err();
        assert!(matches!(err, RigError::MissingCapability { .. }));
        assert!(err.remedy()[0].contains("get.docker.com"));
    }

    #[test]
    fn unknown_tool_hint_is_a_lookup_command() {
        let mgr = CapabilityManager::new();
        let err = mgr.check(&Capability::Tool("just".into())).unwrap_err();
        assert_eq!(err.remedy(), ["command -v just".to_string()]);
    }

    #[test]
    fn revoke_removes_capability() {
        let mut mgr = CapabilityManager::new();
        mgr.grant(Capability::PrivilegeEscalation);
        mgr.revoke(&Capability::PrivilegeEscalation);
        assert!(!mgr.has(&Capability::PrivilegeEscalation));
        // Revoking again is a no-op.
        mgr.revoke(&Capability::PrivilegeEscalation);
    }

    #[test]
    fn tools_are_distinguished_by_name() {
        let mut mgr = CapabilityManager::new();
        mgr.grant(Capability::Tool("docker".into()));
        assert!(mgr.check(&Capability::Tool("podman".into())).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn detect_finds_sh_and_skips_nonsense() {
        let mgr = CapabilityManager::detect(["sh", "definitely-not-a-real-tool-xyz"], false);
        assert!(mgr.has(&Capability::Tool("sh".into())));
        assert!(!mgr.has(&Capability::Tool("definitely-not-a-real-tool-xyz".into())));
        assert!(!mgr.has(&Capability::PrivilegeEscalation));
    }
}
