//! State probes.
//!
//! Each probe inspects one kind of resource and returns a fresh
//! [`StateSnapshot`].  Probes never mutate anything, so they can be called
//! before an action, after it, and again after that.
//!
//! Version comparison is exact string equality: a newer version is as wrong
//! as an older one.  Limits compare with `>=` and every target must hold.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use rigup_hal::{ContainerRuntime, PackageManager, Sysctl, VersionManager};
use rigup_types::{LimitTarget, RigError, StateSnapshot};

/// Compare a reported version against the desired one.
pub fn probe_version(reported: Option<String>, desired: &str) -> StateSnapshot {
    match reported {
        None => StateSnapshot::absent().with_detail("desired", desired),
        Some(actual) => StateSnapshot::present(actual == desired)
            .with_detail("desired", desired)
            .with_detail("actual", actual),
    }
}

pub fn probe_toolchain(vm: &dyn VersionManager, desired: &str) -> StateSnapshot {
    probe_version(vm.current_version(), desired)
}

pub fn probe_package_manager(pm: &dyn PackageManager, desired: &str) -> StateSnapshot {
    probe_version(pm.current_version(), desired)
}

pub fn probe_network(rt: &dyn ContainerRuntime, name: &str) -> Result<StateSnapshot, RigError> {
    Ok(if rt.network_exists(name)? {
        StateSnapshot::present(true)
    } else {
        StateSnapshot::absent()
    })
}

/// Look for `name` among running and stopped containers.  Only a running
/// container matches; the `state` detail is `running`, `stopped` or `absent`.
pub fn probe_container(rt: &dyn ContainerRuntime, name: &str) -> Result<StateSnapshot, RigError> {
    if rt.list_running()?.iter().any(|c| c == name) {
        return Ok(StateSnapshot::present(true).with_detail("state", "running"));
    }
    if rt.list_all()?.iter().any(|c| c == name) {
        return Ok(StateSnapshot::present(false).with_detail("state", "stopped"));
    }
    Ok(StateSnapshot::absent().with_detail("state", "absent"))
}

/// Readiness ping: run the service's health command inside its container.
pub fn probe_health(rt: &dyn ContainerRuntime, name: &str, health_check: &[String]) -> Result<bool, RigError> {
    Ok(rt.exec(name, health_check)?.success())
}

/// Read every target's current value.  Matches only when all are `>=` their
/// target; an unreadable key counts as unmet.
pub fn probe_limits(sysctl: &dyn Sysctl, targets: &[LimitTarget]) -> Result<StateSnapshot, RigError> {
    let mut all_met = true;
    let mut any_present = false;
    let mut details = Vec::with_capacity(targets.len());
    for target in targets {
        let current = sysctl.read(&target.key)?;
        any_present |= current.is_some();
        let met = current.is_some_and(|v| v >= target.value);
        all_met &= met;
        let shown = current.map_or_else(|| "unavailable".to_string(), |v| v.to_string());
        details.push((target.key.clone(), shown));
    }
    let snapshot = if any_present || targets.is_empty() {
        StateSnapshot::present(all_met)
    } else {
        StateSnapshot::absent()
    };
    Ok(details
        .into_iter()
        .fold(snapshot, |snap, (k, v)| snap.with_detail(&k, v)))
}

/// Existence only.
pub fn probe_path(path: &Path) -> StateSnapshot {
    if path.exists() {
        StateSnapshot::present(true)
    } else {
        StateSnapshot::absent()
    }
}

/// Keys defined in a dotenv-style file (`KEY=value`, optional `export`,
/// `#` comments).
pub fn defined_keys(path: &Path) -> Result<BTreeSet<String>, RigError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| RigError::io(path, &e).with_remedy([format!("chmod u+r {}", path.display())]))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let l = l.strip_prefix("export ").unwrap_or(l);
            l.split_once('=').map(|(k, _)| k.trim().to_string())
        })
        .filter(|k| !k.is_empty())
        .collect())
}

/// The subset of `required` not defined in `path`, in the order given.
pub fn missing_keys<'a>(
    path: &Path,
    required: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<String>, RigError> {
    let defined = defined_keys(path)?;
    Ok(required
        .into_iter()
        .filter(|k| !defined.contains(*k))
        .map(str::to_string)
        .collect())
}
