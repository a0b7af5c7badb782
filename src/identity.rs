// Local bidder identity: a single opaque string, created once and reused
// across sessions. The sync core only ever compares it against
// `highest_bidder` fields; it carries no other meaning.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tracing::info;

const IDENTITY_FILE: &str = "identity";
const SUFFIX_LEN: usize = 9;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("could not determine a data directory for this platform")]
    NoDataDir,

    #[error("failed to access identity file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Load the persisted identity, creating it on first run.
pub fn load_or_create() -> Result<String, IdentityError> {
    let dirs = ProjectDirs::from("", "", "bidboard").ok_or(IdentityError::NoDataDir)?;
    load_or_create_at(&dirs.data_dir().join(IDENTITY_FILE))
}

/// Lower-level primitive working on an explicit path, so tests don't touch
/// the real data directory.
pub(crate) fn load_or_create_at(path: &Path) -> Result<String, IdentityError> {
    let io_err = |source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    };

    if path.exists() {
        let stored = std::fs::read_to_string(path).map_err(io_err)?;
        let stored = stored.trim();
        if !stored.is_empty() {
            return Ok(stored.to_string());
        }
        // An empty file is treated as absent and regenerated below.
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let id = generate_id();
    std::fs::write(path, &id).map_err(io_err)?;
    info!("created new local identity {id}");
    Ok(id)
}

/// `user_` plus a short random alphanumeric suffix.
fn generate_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("user_{suffix}")
}
