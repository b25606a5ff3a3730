//! Template discovery.
//!
//! Walks the templates directory, parses every selected file and builds a
//! [`TemplateSet`]. A file that cannot be read or parsed is logged and
//! skipped; it never aborts the load.

use crate::config::TemplateSettings;
use crate::store::TemplateSet;
use crate::template::Template;
use globset::{Glob, GlobMatcher};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Result of loading a templates directory.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// Successfully parsed templates, in load order
    pub templates: TemplateSet,
    /// Files that were skipped
    pub failed: Vec<PathBuf>,
}

/// Loads template documents from a directory tree.
#[derive(Debug, Clone)]
pub struct TemplateLoader {
    root: PathBuf,
    include: GlobMatcher,
}

impl TemplateLoader {
    pub fn new(settings: &TemplateSettings) -> anyhow::Result<Self> {
        let include = Glob::new(&settings.include)
            .map_err(|e| anyhow::anyhow!("Invalid glob {:?}: {}", settings.include, e))?
            .compile_matcher();
        Ok(Self {
            root: settings.path.clone(),
            include,
        })
    }

    /// Directory being loaded.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load every selected file below the root, in path order.
    pub fn load(&self) -> LoadOutcome {
        let mut outcome = LoadOutcome::default();

        if !self.root.is_dir() {
            warn!(path = %self.root.display(), "Templates folder not found");
            return outcome;
        }

        let mut files = Vec::new();
        if let Err(e) = collect_files(&self.root, &mut files) {
            warn!(path = %self.root.display(), error = %e, "Error reading templates");
        }
        files.sort();

        for path in files {
            let relative = path.strip_prefix(&self.root).unwrap_or(&path);
            if !self.include.is_match(relative) {
                continue;
            }
            match load_file(&path) {
                Ok(template) => {
                    let key = template.key();
                    match outcome.templates.insert(template) {
                        Ok(()) => info!(key = %key, path = %path.display(), "Loaded template"),
                        Err(e) => {
                            error!(path = %path.display(), error = %e, "Invalid endpoint pattern");
                            outcome.failed.push(path);
                        }
                    }
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to parse template");
                    outcome.failed.push(path);
                }
            }
        }

        info!(
            path = %self.root.display(),
            loaded = outcome.templates.len(),
            failed = outcome.failed.len(),
            "Template load finished"
        );
        outcome
    }
}

fn load_file(path: &Path) -> anyhow::Result<Template> {
    let content = std::fs::read_to_string(path)?;
    Ok(Template::parse(&content)?)
}

/// Symlinked directories are skipped so a link cycle cannot recurse forever;
/// symlinked files are followed.
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_symlink() && path.is_dir() {
            warn!(path = %path.display(), "Skipping symlinked directory");
        } else if file_type.is_dir() {
            if let Err(e) = collect_files(&path, files) {
                warn!(path = %path.display(), error = %e, "Skipping unreadable directory");
            }
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn loader_for(dir: &Path, include: &str) -> TemplateLoader {
        TemplateLoader::new(&TemplateSettings {
            path: dir.to_path_buf(),
            include: include.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_load_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("users/orders")).unwrap();
        fs::write(dir.path().join("ping.txt"), "GET /ping\nSuccess body:\npong").unwrap();
        fs::write(dir.path().join("users/get.txt"), "GET /users/:id\nSuccess body:\nuser").unwrap();
        fs::write(
            dir.path().join("users/orders/list.txt"),
            "GET /users/:id/orders\nSuccess body:\n[]",
        )
        .unwrap();

        let outcome = loader_for(dir.path(), "**/*").load();
        assert_eq!(outcome.templates.len(), 3);
        assert!(outcome.failed.is_empty());
        assert!(outcome.templates.get("GET /ping").is_some());
        assert_eq!(
            outcome.templates.resolve("GET", "/users/5/orders").unwrap().success_body,
            "[]"
        );
    }

    #[test]
    fn test_malformed_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "GET /ok\nSuccess body:\nok").unwrap();
        fs::write(dir.path().join("b.txt"), "garbage").unwrap();
        fs::write(dir.path().join("c.txt"), "").unwrap();

        let outcome = loader_for(dir.path(), "**/*").load();
        assert_eq!(outcome.templates.len(), 1);
        assert_eq!(outcome.failed.len(), 2);
    }

    #[test]
    fn test_include_glob_filters_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.tpl"), "GET /a").unwrap();
        fs::write(dir.path().join("README.md"), "# notes").unwrap();

        let outcome = loader_for(dir.path(), "**/*.tpl").load();
        assert_eq!(outcome.templates.len(), 1);
        assert!(outcome.failed.is_empty());
    }

    #[test]
    fn test_missing_directory_yields_empty_set() {
        let outcome = loader_for(Path::new("/no/such/templates"), "**/*").load();
        assert!(outcome.templates.is_empty());
        assert!(outcome.failed.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_cycle_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("users")).unwrap();
        fs::write(dir.path().join("users/get.txt"), "GET /users/:id\nSuccess body:\nuser").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("users/loop")).unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("users/get.txt"),
            dir.path().join("linked.txt"),
        )
        .unwrap();

        let outcome = loader_for(dir.path(), "**/*").load();
        assert_eq!(outcome.templates.len(), 1);
        assert!(outcome.failed.is_empty());
    }

    #[test]
    fn test_files_load_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2.txt"), "GET /x/:id\nSuccess body:\nsecond").unwrap();
        fs::write(dir.path().join("1.txt"), "GET /x/*\nSuccess body:\nfirst").unwrap();

        let outcome = loader_for(dir.path(), "**/*").load();
        assert_eq!(outcome.templates.resolve("GET", "/x/1").unwrap().success_body, "first");
    }
}
