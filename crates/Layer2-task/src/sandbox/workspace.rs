//! Host-side sandbox workspaces

use agentd_foundation::{Error, Result};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Mode when the workspace is owned by the exec user
#[cfg(unix)]
const OWNED_MODE: u32 = 0o770;

/// Mode when ownership could not be handed over: world-writable with the
/// sticky bit so nobody removes entries they do not own
#[cfg(unix)]
const SHARED_MODE: u32 = 0o1777;

/// Create a fresh directory `base/name`. Fails if it already exists.
///
/// `owner` is the exec identity (`uid[:gid]`). When the directory can be
/// chowned to it only that identity gets access, otherwise it falls back to
/// a sticky shared directory.
pub fn allocate(base: &Path, name: &str, owner: Option<&str>) -> Result<PathBuf> {
    std::fs::create_dir_all(base).map_err(|e| {
        Error::Sandbox(format!(
            "Failed to create workspace base {}: {}",
            base.display(),
            e
        ))
    })?;

    let path = base.join(name);
    std::fs::create_dir(&path).map_err(|e| {
        Error::Sandbox(format!(
            "Failed to create workspace {}: {}",
            path.display(),
            e
        ))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = match owner.and_then(parse_owner) {
            Some((uid, gid)) => match std::os::unix::fs::chown(&path, Some(uid), Some(gid)) {
                Ok(()) => OWNED_MODE,
                Err(e) => {
                    debug!("Cannot hand {} to {}:{}: {}", path.display(), uid, gid, e);
                    SHARED_MODE
                }
            },
            None => SHARED_MODE,
        };
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            Error::Sandbox(format!("Failed to set workspace permissions: {}", e))
        })?;
    }
    #[cfg(not(unix))]
    let _ = owner;

    Ok(path)
}

/// `"1000:1000"` or `"1000"`; user names are not resolved
fn parse_owner(user: &str) -> Option<(u32, u32)> {
    let (uid, gid) = match user.split_once(':') {
        Some((uid, gid)) => (uid, gid),
        None => (user, user),
    };
    Some((uid.trim().parse().ok()?, gid.trim().parse().ok()?))
}

/// Remove a workspace; a missing directory is fine
pub fn remove(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Sandbox(format!(
            "Failed to remove workspace {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Best-effort removal used on teardown paths
pub fn remove_quietly(path: &Path) {
    if let Err(e) = remove(path) {
        warn!("{}", e);
    }
}

fn walker(root: &Path) -> ignore::Walk {
    WalkBuilder::new(root)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .follow_links(false)
        .build()
}

/// Regular files under `root`, relative and sorted
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!(
            "Workspace {} does not exist",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in walker(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable workspace entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Total bytes of regular files under `root`
pub fn size_bytes(root: &Path) -> Result<u64> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!(
            "Workspace {} does not exist",
            root.display()
        )));
    }

    let mut total = 0u64;
    for entry in walker(root).flatten() {
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    Ok(total)
}
