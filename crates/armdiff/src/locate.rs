//! Simulator binary discovery.
//!
//! Without an explicit path, each simulator is looked up by name in the
//! current directory and its neighbors, then under an architecture-suffixed
//! name (e.g. `ref_sim_x86_64`).

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::channel::ChannelId;
use crate::error::{Error, Result};

/// Directories searched, relative to the working directory, in order.
pub const SEARCH_DIRS: [&str; 3] = [".", "..", "../src"];

/// Resolved executables for both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorPaths {
    pub candidate: PathBuf,
    pub reference: PathBuf,
}

impl SimulatorPaths {
    #[must_use]
    pub fn get(&self, id: ChannelId) -> &Path {
        match id {
            ChannelId::Candidate => &self.candidate,
            ChannelId::Reference => &self.reference,
        }
    }
}

/// Regular file with at least one execute bit set.
#[must_use]
pub fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

/// Candidate locations for `name` under `base`, in search order.
#[must_use]
pub fn search_paths(base: &Path, name: &str) -> Vec<PathBuf> {
    let arch_name = format!("{name}_{}", std::env::consts::ARCH);
    [name, arch_name.as_str()]
        .iter()
        .flat_map(|n| SEARCH_DIRS.iter().map(move |dir| base.join(dir).join(n)))
        .collect()
}

/// Find one simulator, honoring an explicit override.
///
/// # Errors
///
/// [`Error::NotExecutable`] if the override is not an executable file,
/// [`Error::BinaryNotFound`] if nothing in the search order qualifies.
pub fn find_in(base: &Path, role: ChannelId, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !is_executable(path) {
            return Err(Error::NotExecutable {
                role,
                path: path.to_path_buf(),
            });
        }
        return Ok(path.to_path_buf());
    }

    let searched = search_paths(base, role.default_binary());
    match searched.iter().find(|p| is_executable(p)) {
        Some(found) => {
            debug!(%role, path = %found.display(), "located simulator");
            Ok(found.clone())
        }
        None => Err(Error::BinaryNotFound { role, searched }),
    }
}

/// Resolve both simulators relative to the working directory.
///
/// # Errors
///
/// See [`find_in`].
pub fn resolve(candidate: Option<&Path>, reference: Option<&Path>) -> Result<SimulatorPaths> {
    let base = std::env::current_dir()?;
    Ok(SimulatorPaths {
        candidate: find_in(&base, ChannelId::Candidate, candidate)?,
        reference: find_in(&base, ChannelId::Reference, reference)?,
    })
}
