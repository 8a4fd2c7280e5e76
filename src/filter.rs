use std::path::{Path, PathBuf};
use ignore::overrides::{Override, OverrideBuilder};
use anyhow::{Context, Result};

/// Decides which paths under the source root are mirrored.
///
/// Patterns use gitignore glob syntax and name paths to exclude.
#[derive(Clone, Debug)]
pub struct PathFilter {
    root_path: PathBuf,
    excludes: Override,
}

impl PathFilter {
    pub fn new<P: AsRef<Path>>(root_path: P, patterns: &[String]) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        let mut builder = OverrideBuilder::new(&root_path);
        for pattern in patterns {
            // Override globs whitelist by default; "!" turns them into ignores.
            builder
                .add(&format!("!{}", pattern))
                .with_context(|| format!("Invalid exclude pattern: {}", pattern))?;
        }
        let excludes = builder.build().context("Failed to build exclude patterns")?;
        Ok(Self { root_path, excludes })
    }

    /// A filter that accepts everything.
    pub fn allow_all<P: AsRef<Path>>(root_path: P) -> Self {
        Self {
            root_path: root_path.as_ref().to_path_buf(),
            excludes: Override::empty(),
        }
    }

    /// Build an override set suitable for a `WalkBuilder` over the root.
    pub fn overrides(&self) -> Override {
        self.excludes.clone()
    }

    /// `relative` is relative to the root. Any excluded ancestor excludes the path.
    pub fn should_sync<P: AsRef<Path>>(&self, relative: P, is_dir: bool) -> bool {
        if self.excludes.is_empty() {
            return true;
        }

        let relative = relative.as_ref();
        let mut current = PathBuf::new();
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            current.push(component);
            let dir = components.peek().is_some() || is_dir;
            if self.excludes.matched(self.root_path.join(&current), dir).is_ignore() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let filter = PathFilter::allow_all("/data/source");
        assert!(filter.should_sync("anything/at/all.tmp", false));
    }

    #[test]
    fn test_excludes_files_and_directories() {
        let patterns = vec!["*.tmp".to_string(), "build".to_string()];
        let filter = PathFilter::new("/data/source", &patterns).unwrap();

        assert!(filter.should_sync("notes.txt", false));
        assert!(filter.should_sync("docs/readme.md", false));
        assert!(!filter.should_sync("scratch.tmp", false));
        assert!(!filter.should_sync("docs/scratch.tmp", false));
        assert!(!filter.should_sync("build", true));
        assert!(!filter.should_sync("build/output.bin", false));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let patterns = vec!["[unclosed".to_string()];
        assert!(PathFilter::new("/data/source", &patterns).is_err());
    }
}
