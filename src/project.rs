use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// The project an event belongs to.
///
/// `id` doubles as the cache session tag, so two host sessions on the same
/// project share cached enhancements and a clear on one clears both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub root: Option<PathBuf>,
    pub id: String,
}

impl Project {
    /// Resolve the project from the event's working directory: the enclosing
    /// git work tree if there is one, otherwise `cwd` itself.
    pub fn discover(cwd: Option<&Path>) -> Self {
        let cwd = cwd
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok());
        let Some(cwd) = cwd else {
            return Self::from_root(None);
        };
        let root = git2::Repository::discover(&cwd)
            .ok()
            .and_then(|repo| repo.workdir().map(Path::to_path_buf))
            .unwrap_or(cwd);
        let root = root.canonicalize().unwrap_or(root);
        Self::from_root(Some(root))
    }

    pub fn from_root(root: Option<PathBuf>) -> Self {
        let id = match &root {
            Some(root) => project_id(root),
            None => "global".to_string(),
        };
        Self { root, id }
    }
}

/// `<basename>-<16 hex chars of sha256(path)>`.
fn project_id(root: &Path) -> String {
    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("root");
    let digest = Sha256::digest(root.to_string_lossy().as_bytes());
    format!("{name}-{}", &hex::encode(digest)[..16])
}
