//! Read-only access to saved firing profiles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kiln_types::{KilnError, Profile};
use tracing::debug;

/// Supplies [`Profile`] values by name.
pub trait ProfileStore: Send {
    fn load(&self, name: &str) -> Result<Profile, KilnError>;
}

/// Profiles stored as `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ProfileStore for JsonDirStore {
    fn load(&self, name: &str) -> Result<Profile, KilnError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(KilnError::ProfileNotFound(name.to_string()));
        }
        let path = self.dir.join(format!("{name}.json"));
        let raw = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => KilnError::ProfileNotFound(name.to_string()),
            _ => KilnError::from(e),
        })?;
        debug!(path = %path.display(), "loaded profile");
        Profile::from_json(&raw)
    }
}

/// In-memory store, keyed by profile name.
impl ProfileStore for HashMap<String, Profile> {
    fn load(&self, name: &str) -> Result<Profile, KilnError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| KilnError::ProfileNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_profile_by_name() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        std::fs::write(
            dir.path().join("bisque.json"),
            r#"{"name": "bisque", "data": [[0, 70], [3600, 1000]], "type": "profile"}"#,
        )?;
        let store = JsonDirStore::new(dir.path());
        let profile = store.load("bisque")?;
        assert_eq!(profile.name(), "bisque");
        assert_eq!(profile.duration(), 3600.0);
        Ok(())
    }

    #[test]
    fn unknown_or_unsafe_names_are_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let store = JsonDirStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(KilnError::ProfileNotFound(_))));
        assert!(matches!(store.load("../etc/passwd"), Err(KilnError::ProfileNotFound(_))));
        Ok(())
    }

    #[test]
    fn invalid_json_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("broken.json"), "[]")?;
        let store = JsonDirStore::new(dir.path());
        assert!(matches!(store.load("broken"), Err(KilnError::Serialization(_))));
        Ok(())
    }

    #[test]
    fn map_store() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = HashMap::new();
        store.insert("glaze".to_string(), Profile::new("glaze", vec![(0.0, 70.0)])?);
        assert_eq!(store.load("glaze")?.name(), "glaze");
        assert!(store.load("other").is_err());
        Ok(())
    }
}
