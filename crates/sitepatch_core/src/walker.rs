use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use walkdir::WalkDir;

/// Which files a run visits: one or more roots, an extension allowlist and
/// directory names pruned from the walk entirely.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub roots: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from(".")],
            extensions: vec!["html".to_string()],
            exclude_dirs: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "_backup".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEvent {
    Document { root: PathBuf, path: PathBuf },
    /// An unreadable entry or subtree. Reported and skipped, never fatal.
    Failed { path: PathBuf, reason: String },
}

/// A root that does not exist at all is a configuration error, caught
/// before the walk begins. Unreadable-but-present subtrees are handled
/// per-item by the walk itself.
pub fn ensure_roots_exist(options: &WalkOptions) -> Result<()> {
    for root in &options.roots {
        if !root.exists() {
            bail!("walk root does not exist: {}", root.display());
        }
    }
    Ok(())
}

/// Enumerate matching documents under every root. Lazy and restartable:
/// each call starts a fresh traversal. Symlinks are never followed, so
/// link cycles cannot trap the walk.
pub fn walk_documents(options: &WalkOptions) -> impl Iterator<Item = WalkEvent> + use<> {
    let extensions: Vec<String> = options
        .extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .collect();
    let exclude_dirs = options.exclude_dirs.clone();
    let roots = options.roots.clone();

    roots.into_iter().flat_map(move |root| {
        let extensions = extensions.clone();
        let exclude_dirs = exclude_dirs.clone();
        let event_root = root.clone();
        WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| !is_excluded_dir(entry, &exclude_dirs))
            .filter_map(move |entry| match entry {
                Ok(entry) => {
                    if !entry.file_type().is_file() {
                        return None;
                    }
                    if !has_allowed_extension(entry.path(), &extensions) {
                        return None;
                    }
                    Some(WalkEvent::Document {
                        root: event_root.clone(),
                        path: entry.into_path(),
                    })
                }
                Err(error) => {
                    let path = error
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| event_root.clone());
                    Some(WalkEvent::Failed {
                        path,
                        reason: error.to_string(),
                    })
                }
            })
    })
}

fn is_excluded_dir(entry: &walkdir::DirEntry, exclude_dirs: &[String]) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    entry
        .path()
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| exclude_dirs.iter().any(|excluded| excluded == name))
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .is_some_and(|ext| extensions.iter().any(|allowed| *allowed == ext))
}

/// Path of a document relative to its walk root, with `/` separators.
pub fn relative_to_root(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}
