//! Artifact Cleanup Engine
//!
//! Removes what a previous installation left behind, once all services are
//! stopped. Each target kind has its own existence test:
//!
//! | Kind               | Present when                          | Removal             |
//! |--------------------|---------------------------------------|---------------------|
//! | `Symlink`          | the path itself is a link (dangling ok) | unlink            |
//! | `DirectoryTree`    | the path resolves to a directory      | recursive delete    |
//! | `RegistrationFile` | the path resolves to a regular file   | unlink              |
//!
//! Absent targets are skipped without a run-log line, which makes the whole
//! pass idempotent.

use crate::error::{PreinstallError, Result};
use crate::run_log::RunLog;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Command symlink installed by the previous package.
pub const COMMAND_SYMLINK: &str = "/usr/local/sbin/salt-config";
/// Installation root.
pub const INSTALL_ROOT: &str = "/opt/salt";
/// `PATH` registration entry.
pub const PATHS_ENTRY: &str = "/etc/paths.d/salt";

/// A filesystem artifact of a previous installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CleanupTarget {
    Symlink(PathBuf),
    DirectoryTree(PathBuf),
    RegistrationFile(PathBuf),
}

/// Result of evaluating one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    Absent,
    /// Present, but left in place because of dry run
    WouldRemove,
}

impl CleanupTarget {
    /// Snake-case name of the target kind.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Symlink(p) | Self::DirectoryTree(p) | Self::RegistrationFile(p) => p,
        }
    }

    /// Type-appropriate existence test.
    pub fn exists(&self) -> bool {
        match self {
            Self::Symlink(p) => fs::symlink_metadata(p)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false),
            Self::DirectoryTree(p) => p.is_dir(),
            Self::RegistrationFile(p) => p.is_file(),
        }
    }

    /// Command text used in the run log when removal fails.
    pub fn command(&self) -> String {
        let verb = match self {
            Self::Symlink(_) => "unlink symlink",
            Self::DirectoryTree(_) => "remove directory tree",
            Self::RegistrationFile(_) => "unlink file",
        };
        format!("{} {}", verb, self.path().display())
    }

    fn remove(&self) -> io::Result<()> {
        let result = match self {
            // remove_dir_all unlinks a symlinked root instead of following it
            Self::DirectoryTree(p) => fs::remove_dir_all(p),
            Self::Symlink(p) | Self::RegistrationFile(p) => fs::remove_file(p),
        };
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// The three artifacts of a previous Salt installation, in removal order.
pub fn default_targets() -> Vec<CleanupTarget> {
    vec![
        CleanupTarget::Symlink(PathBuf::from(COMMAND_SYMLINK)),
        CleanupTarget::DirectoryTree(PathBuf::from(INSTALL_ROOT)),
        CleanupTarget::RegistrationFile(PathBuf::from(PATHS_ENTRY)),
    ]
}

/// Remove `target` if it exists.
///
/// A removal failure is written to the run log as fatal and returned.
pub fn cleanup(target: &CleanupTarget, log: &mut RunLog, dry_run: bool) -> Result<CleanupOutcome> {
    if !target.exists() {
        tracing::debug!("{} {} absent", target.kind(), target.path().display());
        return Ok(CleanupOutcome::Absent);
    }

    if dry_run {
        log.line(format!("[DRY RUN] Would remove {}", target.path().display()));
        return Ok(CleanupOutcome::WouldRemove);
    }

    log.line(format!("Removing {}", target.path().display()));
    if let Err(e) = target.remove() {
        return Err(log.abort(PreinstallError::cleanup(
            target.path(),
            target.command(),
            e,
        )));
    }
    log.line("Removed Successfully");
    tracing::info!("Removed {} {}", target.kind(), target.path().display());

    Ok(CleanupOutcome::Removed)
}

/// Evaluate every target in order. The first fatal error ends the sequence.
pub fn cleanup_all(
    targets: &[CleanupTarget],
    log: &mut RunLog,
    dry_run: bool,
) -> Result<Vec<CleanupOutcome>> {
    targets
        .iter()
        .map(|target| cleanup(target, log, dry_run))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn messages(log: &RunLog) -> Vec<String> {
        fs::read_to_string(log.path())
            .unwrap_or_default()
            .lines()
            .map(|l| l.split_once(": ").map(|(_, m)| m.to_string()).unwrap_or_default())
            .collect()
    }

    struct Sandbox {
        dir: TempDir,
        log: RunLog,
    }

    impl Sandbox {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let log = RunLog::open(dir.path().join("preinstall.txt"), "preinstall");
            Self { dir, log }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }
    }

    #[test]
    fn test_symlink_removed() {
        let mut sb = Sandbox::new();
        let link = sb.path("salt-config");
        fs::write(sb.path("real"), "x").unwrap();
        symlink(sb.path("real"), &link).unwrap();

        let target = CleanupTarget::Symlink(link.clone());
        assert_eq!(cleanup(&target, &mut sb.log, false).unwrap(), CleanupOutcome::Removed);

        assert!(fs::symlink_metadata(&link).is_err());
        assert!(sb.path("real").exists(), "Link target must survive");
        assert_eq!(
            messages(&sb.log),
            vec![format!("Removing {}", link.display()), "Removed Successfully".to_string()]
        );
    }

    #[test]
    fn test_dangling_symlink_detected() {
        let mut sb = Sandbox::new();
        let link = sb.path("salt-config");
        symlink(sb.path("gone"), &link).unwrap();

        let target = CleanupTarget::Symlink(link.clone());
        assert!(target.exists());
        assert_eq!(cleanup(&target, &mut sb.log, false).unwrap(), CleanupOutcome::Removed);
        assert!(fs::symlink_metadata(&link).is_err());
    }

    #[test]
    fn test_symlink_predicate_ignores_regular_file() {
        let sb = Sandbox::new();
        let file = sb.path("salt-config");
        fs::write(&file, "not a link").unwrap();

        assert!(!CleanupTarget::Symlink(file.clone()).exists());
        assert!(CleanupTarget::RegistrationFile(file).exists());
    }

    #[test]
    fn test_directory_tree_removed_recursively() {
        let mut sb = Sandbox::new();
        let root = sb.path("opt-salt");
        fs::create_dir_all(root.join("bin/nested")).unwrap();
        fs::write(root.join("bin/nested/salt"), "#!/bin/sh").unwrap();

        let target = CleanupTarget::DirectoryTree(root.clone());
        assert_eq!(cleanup(&target, &mut sb.log, false).unwrap(), CleanupOutcome::Removed);
        assert!(!root.exists());
    }

    #[test]
    fn test_directory_predicate_ignores_file() {
        let sb = Sandbox::new();
        let file = sb.path("opt-salt");
        fs::write(&file, "").unwrap();
        assert!(!CleanupTarget::DirectoryTree(file).exists());
    }

    #[test]
    fn test_absent_target_is_silent() {
        let mut sb = Sandbox::new();
        let target = CleanupTarget::RegistrationFile(sb.path("paths.d-salt"));

        assert_eq!(cleanup(&target, &mut sb.log, false).unwrap(), CleanupOutcome::Absent);
        assert!(!sb.log.path().exists());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let mut sb = Sandbox::new();
        let entry = sb.path("salt");
        fs::write(&entry, "/opt/salt/bin\n").unwrap();
        let targets = vec![CleanupTarget::RegistrationFile(entry)];

        cleanup_all(&targets, &mut sb.log, false).unwrap();
        let after_first = messages(&sb.log).len();

        let second = cleanup_all(&targets, &mut sb.log, false).unwrap();
        assert_eq!(second, vec![CleanupOutcome::Absent]);
        assert_eq!(messages(&sb.log).len(), after_first);
    }

    #[test]
    fn test_dry_run_keeps_files() {
        let mut sb = Sandbox::new();
        let root = sb.path("opt-salt");
        fs::create_dir(&root).unwrap();

        let target = CleanupTarget::DirectoryTree(root.clone());
        assert_eq!(cleanup(&target, &mut sb.log, true).unwrap(), CleanupOutcome::WouldRemove);
        assert!(root.exists());
        assert_eq!(
            messages(&sb.log),
            vec![format!("[DRY RUN] Would remove {}", root.display())]
        );
    }

    #[test]
    fn test_removal_failure_is_fatal() {
        use std::os::unix::fs::PermissionsExt;

        // Root ignores directory permissions; nothing to assert there.
        if nix::unistd::geteuid().is_root() {
            return;
        }

        let mut sb = Sandbox::new();
        let parent = sb.path("locked");
        fs::create_dir(&parent).unwrap();
        let entry = parent.join("salt");
        fs::write(&entry, "").unwrap();
        fs::set_permissions(&parent, fs::Permissions::from_mode(0o555)).unwrap();

        let target = CleanupTarget::RegistrationFile(entry.clone());
        let err = cleanup(&target, &mut sb.log, false).unwrap_err();

        fs::set_permissions(&parent, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(err, PreinstallError::Cleanup { .. }));
        let lines = messages(&sb.log);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with(&format!("command was: unlink file {}", entry.display())));
    }

    #[test]
    fn test_target_serde_shape() {
        let json = serde_json::to_string(&CleanupTarget::Symlink(PathBuf::from("/a"))).unwrap();
        assert_eq!(json, r#"{"kind":"symlink","path":"/a"}"#);
        assert_eq!(CleanupTarget::DirectoryTree(PathBuf::new()).kind(), "directory_tree");
    }
}
