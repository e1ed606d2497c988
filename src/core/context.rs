use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "tsx", "scss", "css", "java", "cpp", "c", "h", "rs", "go",
];

const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".pytest_cache",
    "venv",
    "env",
    "target",
];

/// Collects source files of a checkout into a single prompt-ready string.
pub struct ContextFetcher {
    repo_path: PathBuf,
    max_file_chars: usize,
}

impl ContextFetcher {
    pub fn new(repo_path: impl Into<PathBuf>, max_file_chars: usize) -> Self {
        Self {
            repo_path: repo_path.into(),
            max_file_chars,
        }
    }

    /// Renders each source file as `File: <relative path>\n<content>`, blocks
    /// separated by a blank line, in path order.
    pub fn collect_source_context(&self) -> String {
        let mut files = self.source_files();
        files.sort();

        let mut blocks = Vec::with_capacity(files.len());
        for path in files {
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    warn!("Failed to read {}: {}", path.display(), err);
                    continue;
                }
            };
            let relative = path.strip_prefix(&self.repo_path).unwrap_or(&path);
            blocks.push(format!(
                "File: {}\n{}",
                relative.display(),
                self.clip(content)
            ));
        }

        debug!("Collected {} context files", blocks.len());
        blocks.join("\n\n")
    }

    fn source_files(&self) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(&self.repo_path)
            .hidden(false)
            .git_ignore(false)
            .filter_entry(|entry| !is_skipped_dir(entry.path()))
            .build();

        walker
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map_or(false, |ft| ft.is_file()))
            .map(|entry| entry.into_path())
            .filter(|path| has_source_extension(path))
            .collect()
    }

    fn clip(&self, content: String) -> String {
        if self.max_file_chars == 0 || content.chars().count() <= self.max_file_chars {
            return content;
        }
        let clipped = crate::core::prompt::truncate(&content, self.max_file_chars);
        format!("{clipped}\n... (file truncated)")
    }
}

fn is_skipped_dir(path: &Path) -> bool {
    path.is_dir()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| SKIPPED_DIRS.contains(&name))
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| SOURCE_EXTENSIONS.contains(&ext))
}
