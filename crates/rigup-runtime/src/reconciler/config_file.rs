//! Configuration-file reconciler.
//!
//! An absent file is materialized from its template.  Files with required keys
//! are then checked key by key; missing keys get a clearly marked block of
//! safe local defaults appended.  This is a convenience for local development,
//! not a guarantee the values are right, so the outcome is always a warning.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use rigup_kernel::VerifiedExecutor;
use rigup_kernel::probe::{missing_keys, probe_path};
use rigup_types::{ActionOutput, ConvergenceOutcome, DesiredState, ManagedResource, RigError, StateSnapshot};

use super::{Lifecycle, remedy, wrong_descriptor};

/// Header line of an injected defaults block.
pub const DEFAULTS_MARKER: &str = "# --- rigup: local defaults injected for missing keys ---";

/// Produces the initial contents of a configuration file.
pub trait TemplateSource {
    fn render(&self, template: &Path) -> Result<String, RigError>;
}

/// Templates are plain files relative to the project root (e.g.
/// `.env.example`), copied verbatim.
pub struct FileTemplate {
    root: PathBuf,
}

impl FileTemplate {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateSource for FileTemplate {
    fn render(&self, template: &Path) -> Result<String, RigError> {
        let path = self.root.join(template);
        fs::read_to_string(&path).map_err(|e| RigError::io(&path, &e))
    }
}

/// Converge the file named by `resource` (a path relative to `root`).
pub fn reconcile_config_file(
    resource: &ManagedResource,
    root: &Path,
    templates: &dyn TemplateSource,
    exec: &mut VerifiedExecutor,
) -> ConvergenceOutcome {
    let DesiredState::FilePresent { template, required_keys } = resource.desired() else {
        return wrong_descriptor(resource, "file");
    };
    let path = root.join(resource.name());
    let required = || required_keys.keys().map(String::as_str);

    let mut lc = Lifecycle::start(resource);
    let snapshot = match snapshot(&path, required()) {
        Ok(s) => s,
        Err(e) => return lc.failed(e),
    };
    if !lc.probed(&snapshot) {
        return lc.satisfied();
    }

    let name = resource.to_string();
    let result = (|| -> Result<Option<String>, RigError> {
        if !snapshot.present {
            let out = exec.execute(&name, "materialize", || materialize(&path, template, templates))?;
            let verified = exec.verify(&name, out, || Ok(probe_path(&path).present))?;
            if !verified.confirmed {
                return Err(RigError::ActionFailedUnverifiable {
                    resource: name.clone(),
                    details: verified.reported(),
                    remedy: remedy([format!(
                        "cp {} {}",
                        root.join(template).display(),
                        path.display()
                    )]),
                });
            }
        }

        let missing = missing_keys(&path, required())?;
        if missing.is_empty() {
            return Ok(None);
        }
        let block = defaults_block(&missing, |k| required_keys.get(k).map(String::as_str));
        let out = exec.execute(&name, "inject defaults", || append(&path, &block))?;
        let verified = exec.verify(&name, out, || Ok(missing_keys(&path, required())?.is_empty()))?;
        if !verified.confirmed {
            return Err(RigError::ActionFailedUnverifiable {
                resource: name.clone(),
                details: format!("keys still missing: {}", missing.join(", ")),
                remedy: missing
                    .iter()
                    .map(|k| format!("echo '{k}=<value>' >> {}", path.display()))
                    .collect(),
            });
        }
        Ok(Some(format!(
            "injected local defaults for {} into {}; review before sharing",
            missing.join(", "),
            resource.name()
        )))
    })();
    lc.finish(result)
}

fn snapshot<'a>(path: &Path, required: impl IntoIterator<Item = &'a str>) -> Result<StateSnapshot, RigError> {
    let snap = probe_path(path);
    if !snap.present {
        return Ok(snap);
    }
    let missing = missing_keys(path, required)?;
    Ok(StateSnapshot::present(missing.is_empty()).with_detail("missing_keys", missing.join(",")))
}

fn materialize(path: &Path, template: &Path, templates: &dyn TemplateSource) -> Result<ActionOutput, RigError> {
    let contents = match templates.render(template) {
        Ok(c) => c,
        // A missing template is reported as a failed action; verification
        // then decides.
        Err(e) => return Ok(ActionOutput::failed(1, e.to_string())),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| RigError::io(parent, &e).with_remedy([format!("mkdir -p {}", parent.display())]))?;
    }
    fs::write(path, contents)
        .map_err(|e| RigError::io(path, &e).with_remedy([format!("chmod u+w {}", path.display())]))?;
    Ok(ActionOutput::ok(""))
}

fn append(path: &Path, block: &str) -> Result<ActionOutput, RigError> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|mut f| f.write_all(block.as_bytes()))
        .map_err(|e| RigError::io(path, &e).with_remedy([format!("chmod u+w {}", path.display())]))?;
    Ok(ActionOutput::ok(""))
}

fn defaults_block<'a>(missing: &[String], default_for: impl Fn(&str) -> Option<&'a str>) -> String {
    let mut block = format!("\n{DEFAULTS_MARKER}\n");
    for key in missing {
        block.push_str(&format!("{key}={}\n", default_for(key).unwrap_or_default()));
    }
    block
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use rigup_types::ResourceKind;

    fn env_file(required: &[(&str, &str)]) -> ManagedResource {
        let required_keys: BTreeMap<String, String> = required
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ManagedResource::new(
            ResourceKind::ConfigFile,
            ".env",
            DesiredState::FilePresent {
                template: PathBuf::from(".env.example"),
                required_keys,
            },
        )
    }

    #[test]
    fn existing_complete_file_is_untouched() {
        let dir = tempfile::tempdir().expect("tmp dir");
        fs::write(dir.path().join(".env"), "DATABASE_URL=x\n").unwrap();
        let mut exec = VerifiedExecutor::new();
        let outcome = reconcile_config_file(
            &env_file(&[("DATABASE_URL", "postgres://localhost")]),
            dir.path(),
            &FileTemplate::new(dir.path()),
            &mut exec,
        );
        assert_eq!(outcome, ConvergenceOutcome::AlreadySatisfied);
        assert_eq!(exec.actions(), 0);
    }

    #[test]
    fn absent_file_is_materialized_from_template() {
        let dir = tempfile::tempdir().expect("tmp dir");
        fs::write(dir.path().join(".env.example"), "DATABASE_URL=postgres://example\n").unwrap();
        let outcome = reconcile_config_file(
            &env_file(&[("DATABASE_URL", "postgres://localhost")]),
            dir.path(),
            &FileTemplate::new(dir.path()),
            &mut VerifiedExecutor::new(),
        );
        assert_eq!(outcome, ConvergenceOutcome::Converged);
        let written = fs::read_to_string(dir.path().join(".env")).unwrap();
        assert_eq!(written, "DATABASE_URL=postgres://example\n");
    }

    #[test]
    fn missing_keys_get_flagged_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        fs::write(dir.path().join(".env"), "DATABASE_URL=x").unwrap();
        let outcome = reconcile_config_file(
            &env_file(&[("DATABASE_URL", "unused"), ("REDIS_URL", "redis://localhost:6379")]),
            dir.path(),
            &FileTemplate::new(dir.path()),
            &mut VerifiedExecutor::new(),
        );
        let ConvergenceOutcome::ConvergedWithWarning(reason) = outcome else {
            panic!("expected warning, got {outcome:?}");
        };
        assert!(reason.contains("REDIS_URL"));
        let written = fs::read_to_string(dir.path().join(".env")).unwrap();
        assert!(written.contains(DEFAULTS_MARKER));
        assert!(written.ends_with("REDIS_URL=redis://localhost:6379\n"));
        assert!(!written.contains("DATABASE_URL=unused"));
    }

    #[test]
    fn second_run_after_injection_is_satisfied() {
        let dir = tempfile::tempdir().expect("tmp dir");
        fs::write(dir.path().join(".env.example"), "").unwrap();
        let res = env_file(&[("SECRET_KEY", "dev-only")]);
        let templates = FileTemplate::new(dir.path());
        let first = reconcile_config_file(&res, dir.path(), &templates, &mut VerifiedExecutor::new());
        assert!(matches!(first, ConvergenceOutcome::ConvergedWithWarning(_)));
        let mut exec = VerifiedExecutor::new();
        let second = reconcile_config_file(&res, dir.path(), &templates, &mut exec);
        assert_eq!(second, ConvergenceOutcome::AlreadySatisfied);
        assert_eq!(exec.actions(), 0);
    }

    #[test]
    fn missing_template_fails_with_copy_remedy() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let outcome = reconcile_config_file(
            &env_file(&[]),
            dir.path(),
            &FileTemplate::new(dir.path()),
            &mut VerifiedExecutor::new(),
        );
        let ConvergenceOutcome::Failed(err) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(matches!(err, RigError::ActionFailedUnverifiable { .. }));
        assert!(err.remedy()[0].starts_with("cp "));
    }
}
