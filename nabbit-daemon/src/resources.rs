//! Resource locator
//!
//! Maps a logical name such as `nabclockd/ringtone/*.mp3;nabd/default.mp3`
//! to a file under one of the configured roots:
//!
//! - `;` separates alternatives, tried in order
//! - `*` in the file name matches any run of characters; one of the
//!   matching files is picked at random
//! - `<root>/<kind>/<locale>/` is searched before `<root>/<kind>/`

use std::path::{Path, PathBuf};

use rand::seq::IndexedRandom;
use tracing::{debug, warn};

use crate::config::ResourcesConfig;

/// `sounds` resources
pub const SOUNDS: &str = "sounds";
/// `choreographies` resources
pub const CHOREOGRAPHIES: &str = "choreographies";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLocator {
    roots: Vec<PathBuf>,
    locale: Option<String>,
}

impl ResourceLocator {
    pub fn new(roots: Vec<PathBuf>, locale: Option<String>) -> Self {
        Self { roots, locale }
    }

    pub fn from_config(config: &ResourcesConfig) -> Self {
        Self::new(config.roots.clone(), config.locale.clone())
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// Find the file for `name` among resources of `kind`
    pub fn find(&self, kind: &str, name: &str) -> Option<PathBuf> {
        let found = name
            .split(';')
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
            .find_map(|alt| self.find_one(kind, alt));
        if found.is_none() {
            debug!("No {} resource for {}", kind, name);
        }
        found
    }

    /// Read the file for `name`
    pub fn read(&self, kind: &str, name: &str) -> Option<Vec<u8>> {
        let path = self.find(kind, name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn find_one(&self, kind: &str, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }
        for root in &self.roots {
            let base = root.join(kind);
            let mut dirs = Vec::with_capacity(2);
            if let Some(locale) = &self.locale {
                dirs.push(base.join(locale));
            }
            dirs.push(base);
            for dir in dirs {
                let found = if name.contains('*') {
                    pick_match(&dir, name)
                } else {
                    let candidate = dir.join(name);
                    candidate.is_file().then_some(candidate)
                };
                if found.is_some() {
                    return found;
                }
            }
        }
        None
    }
}

/// Random file in `dir` matching `pattern`; only the last component may
/// hold wildcards
fn pick_match(dir: &Path, pattern: &str) -> Option<PathBuf> {
    let (sub, file_pattern) = match pattern.rsplit_once('/') {
        Some((sub, file)) => (Some(sub), file),
        None => (None, pattern),
    };
    if sub.is_some_and(|s| s.contains('*')) {
        return None;
    }
    let search = match sub {
        Some(sub) => dir.join(sub),
        None => dir.to_path_buf(),
    };
    let entries = std::fs::read_dir(&search).ok()?;
    let matches: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|file| wildcard_match(file_pattern, file))
        })
        .map(|entry| entry.path())
        .collect();
    matches.choose(&mut rand::rng()).cloned()
}

/// Match `text` against a pattern where `*` stands for any run of characters
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // No wildcard at all
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, file.as_bytes()).unwrap();
        }
        dir
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*.mp3", "a.mp3"));
        assert!(wildcard_match("ring*.mp3", "ring2.mp3"));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(wildcard_match("plain", "plain"));
        assert!(!wildcard_match("plain", "plainer"));
        assert!(!wildcard_match("*.mp3", "a.wav"));
        assert!(!wildcard_match("ab*ba", "aba"));
    }

    #[test]
    fn test_locale_directory_first() {
        let dir = tree(&["sounds/fr_FR/hello.mp3", "sounds/hello.mp3", "sounds/only.mp3"]);
        let locator = ResourceLocator::new(vec![dir.path().into()], Some("fr_FR".into()));
        assert_eq!(
            locator.find(SOUNDS, "hello.mp3").unwrap(),
            dir.path().join("sounds/fr_FR/hello.mp3")
        );
        assert_eq!(
            locator.find(SOUNDS, "only.mp3").unwrap(),
            dir.path().join("sounds/only.mp3")
        );
    }

    #[test]
    fn test_alternatives_in_order() {
        let dir = tree(&["sounds/b.mp3", "sounds/c.mp3"]);
        let locator = ResourceLocator::new(vec![dir.path().into()], None);
        let found = locator.find(SOUNDS, "a.mp3;c.mp3;b.mp3").unwrap();
        assert_eq!(found, dir.path().join("sounds/c.mp3"));
        assert!(locator.find(SOUNDS, "x.mp3;y.mp3").is_none());
    }

    #[test]
    fn test_glob_picks_a_match() {
        let dir = tree(&[
            "sounds/nabd/abort/1.mp3",
            "sounds/nabd/abort/2.mp3",
            "sounds/nabd/abort/readme.txt",
        ]);
        let locator = ResourceLocator::new(vec![dir.path().into()], None);
        for _ in 0..10 {
            let found = locator.find(SOUNDS, "nabd/abort/*.mp3").unwrap();
            assert_eq!(found.extension().unwrap(), "mp3");
            assert!(found.starts_with(dir.path().join("sounds/nabd/abort")));
        }
    }

    #[test]
    fn test_later_root_and_read() {
        let first = tree(&[]);
        let second = tree(&["choreographies/x.chor"]);
        let locator = ResourceLocator::new(vec![first.path().into(), second.path().into()], None);
        assert_eq!(locator.read(CHOREOGRAPHIES, "x.chor").unwrap(), b"choreographies/x.chor");
        assert!(locator.read(SOUNDS, "x.chor").is_none());
    }
}
