use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Files under `directory` whose extension is in `extensions`, sorted by
/// path. An empty extension list accepts every file.
pub fn discover_files(directory: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if path.is_file() {
            let accepted = extensions.is_empty()
                || path.extension().is_some_and(|ext| {
                    let ext_lower = ext.to_string_lossy().to_lowercase();
                    extensions.iter().any(|e| e.to_lowercase() == ext_lower)
                });
            if accepted {
                files.push(path.to_path_buf());
            }
        }
    }

    // Sort by path for consistent ordering
    files.sort();

    files
}
