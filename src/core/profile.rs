//! Profile management - sing-box configuration files on disk

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// File created when the profile directory has no profiles
pub const DEFAULT_PROFILE_NAME: &str = "default.json";

/// Placeholder content of the default profile
pub const DEFAULT_PROFILE_CONTENT: &str = "{\n\t\"inbounds\": [],\n\t\"outbounds\": [],\n\t\"route\": {}\n}";

/// Content of a profile created with [`ProfileStore::add`]
pub const EMPTY_PROFILE_CONTENT: &str = "{}";

const PROFILE_EXTENSION: &str = "json";

/// A configuration file the proxy can be launched with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigProfile {
    /// Display name (the file name)
    pub name: String,
    /// Description
    pub description: String,
    /// Path to the configuration file
    pub path: PathBuf,
    /// Whether this profile is used on the next start
    pub is_active: bool,
}

impl ConfigProfile {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            path: path.into(),
            is_active: false,
        }
    }

    /// Name without the `.json` extension
    pub fn display_stem(&self) -> &str {
        self.name
            .strip_suffix(".json")
            .unwrap_or(&self.name)
    }
}

/// The profiles found in one directory, at most one of them active
#[derive(Debug, Clone)]
pub struct ProfileStore {
    directory: PathBuf,
    profiles: Vec<ConfigProfile>,
}

impl ProfileStore {
    /// Scan `directory` for profiles.
    ///
    /// The directory is created if missing. When it holds no profiles a default
    /// one is written. `preferred` names the profile to activate; the first
    /// profile is used when it is absent or unknown.
    pub fn load(directory: impl Into<PathBuf>, preferred: Option<&str>) -> Result<Self> {
        let mut store = Self {
            directory: directory.into(),
            profiles: Vec::new(),
        };
        store.populate(preferred)?;
        info!(
            "Loaded {} profile(s) from {:?}",
            store.profiles.len(),
            store.directory
        );
        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn list(&self) -> &[ConfigProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Look up a profile by name, with or without the `.json` extension
    pub fn get(&self, name: &str) -> Option<&ConfigProfile> {
        let file_name = with_extension(name.trim());
        self.profiles.iter().find(|p| p.name == file_name)
    }

    pub fn active(&self) -> Option<&ConfigProfile> {
        self.profiles.iter().find(|p| p.is_active)
    }

    /// Make `name` the only active profile
    pub fn select(&mut self, name: &str) -> Result<&ConfigProfile> {
        let file_name = with_extension(name.trim());
        let index = self
            .profiles
            .iter()
            .position(|p| p.name == file_name)
            .with_context(|| format!("Profile not found: {}", file_name))?;

        for (i, profile) in self.profiles.iter_mut().enumerate() {
            profile.is_active = i == index;
        }
        info!("Active profile: {}", file_name);
        Ok(&self.profiles[index])
    }

    /// Create a new, empty profile file. The new profile is not activated.
    pub fn add(&mut self, name: &str) -> Result<&ConfigProfile> {
        let file_name = validate_name(name)?;
        if self.get(&file_name).is_some() {
            anyhow::bail!("Profile already exists: {}", file_name);
        }

        let path = self.directory.join(&file_name);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Failed to create profile {:?}", path))?;
        file.write_all(EMPTY_PROFILE_CONTENT.as_bytes())
            .with_context(|| format!("Failed to write profile {:?}", path))?;

        info!("Created profile {:?}", path);
        self.profiles
            .push(ConfigProfile::new(file_name, path, "User profile"));
        let last = self.profiles.len() - 1;
        Ok(&self.profiles[last])
    }

    /// Rescan the directory, keeping the active profile when it still exists
    pub fn refresh(&mut self) -> Result<()> {
        let active = self.active().map(|p| p.name.clone());
        self.populate(active.as_deref())
    }

    /// Open a profile with the system's default handler for JSON files
    pub fn open_in_editor(&self, name: &str) -> Result<()> {
        let profile = self
            .get(name)
            .with_context(|| format!("Profile not found: {}", name))?;
        open::that(&profile.path)
            .with_context(|| format!("Failed to open {:?}", profile.path))?;
        Ok(())
    }

    fn populate(&mut self, preferred: Option<&str>) -> Result<()> {
        fs::create_dir_all(&self.directory)
            .with_context(|| format!("Failed to create profile directory {:?}", self.directory))?;

        let mut profiles = scan_directory(&self.directory)?;
        if profiles.is_empty() {
            profiles.push(create_default_profile(&self.directory)?);
        }

        let preferred = preferred.map(|name| with_extension(name.trim()));
        let index = preferred
            .and_then(|name| profiles.iter().position(|p| p.name == name))
            .unwrap_or(0);
        for (i, profile) in profiles.iter_mut().enumerate() {
            profile.is_active = i == index;
        }

        self.profiles = profiles;
        Ok(())
    }
}

fn with_extension(name: &str) -> String {
    if name.ends_with(".json") {
        name.to_string()
    } else {
        format!("{}.json", name)
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name == ".json" {
        anyhow::bail!("Profile name is empty");
    }
    if name.contains(['/', '\\']) || name.starts_with('.') {
        anyhow::bail!("Invalid profile name: {}", name);
    }
    Ok(with_extension(name))
}

fn scan_directory(directory: &Path) -> Result<Vec<ConfigProfile>> {
    let entries = fs::read_dir(directory)
        .with_context(|| format!("Failed to read profile directory {:?}", directory))?;

    let mut profiles = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {:?}: {}", directory, e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(PROFILE_EXTENSION) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        profiles.push(ConfigProfile::new(name, path, "User profile"));
    }

    profiles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(profiles)
}

fn create_default_profile(directory: &Path) -> Result<ConfigProfile> {
    let path = directory.join(DEFAULT_PROFILE_NAME);
    fs::write(&path, DEFAULT_PROFILE_CONTENT)
        .with_context(|| format!("Failed to create default profile {:?}", path))?;
    info!("Created default profile {:?}", path);
    Ok(ConfigProfile::new(DEFAULT_PROFILE_NAME, path, "Default profile"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(store: &ProfileStore) -> Vec<&str> {
        store.list().iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_empty_directory_gets_default_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path(), None).unwrap();

        assert_eq!(names(&store), vec![DEFAULT_PROFILE_NAME]);
        let active = store.active().unwrap();
        assert_eq!(active.name, DEFAULT_PROFILE_NAME);

        let json_files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
            .collect();
        assert_eq!(json_files.len(), 1);

        let content: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&active.path).unwrap()).unwrap();
        assert_eq!(content, json!({"inbounds": [], "outbounds": [], "route": {}}));
    }

    #[test]
    fn test_missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("config").join("profiles");
        let store = ProfileStore::load(&nested, None).unwrap();

        assert!(nested.is_dir());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_scan_only_picks_json_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("work.json"), "{}").unwrap();
        fs::write(dir.path().join("home.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore").unwrap();
        fs::create_dir(dir.path().join("nested.json")).unwrap();

        let store = ProfileStore::load(dir.path(), None).unwrap();

        assert_eq!(names(&store), vec!["home.json", "work.json"]);
        assert_eq!(store.active().unwrap().name, "home.json");
        assert!(!dir.path().join(DEFAULT_PROFILE_NAME).exists());
    }

    #[test]
    fn test_preferred_profile_is_activated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("b.json"), "{}").unwrap();

        let store = ProfileStore::load(dir.path(), Some("b")).unwrap();
        assert_eq!(store.active().unwrap().name, "b.json");

        let store = ProfileStore::load(dir.path(), Some("missing")).unwrap();
        assert_eq!(store.active().unwrap().name, "a.json");
    }

    #[test]
    fn test_select_keeps_single_active_profile() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("b.json"), "{}").unwrap();
        let mut store = ProfileStore::load(dir.path(), None).unwrap();

        store.select("b.json").unwrap();

        assert_eq!(store.list().iter().filter(|p| p.is_active).count(), 1);
        assert_eq!(store.active().unwrap().name, "b.json");
        assert!(store.select("nope").is_err());
        assert_eq!(store.active().unwrap().name, "b.json");
    }

    #[test]
    fn test_add_creates_empty_inactive_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::load(dir.path(), None).unwrap();

        let added = store.add("travel").unwrap().clone();

        assert_eq!(added.name, "travel.json");
        assert!(!added.is_active);
        assert_eq!(fs::read_to_string(&added.path).unwrap(), EMPTY_PROFILE_CONTENT);
        assert_eq!(store.active().unwrap().name, DEFAULT_PROFILE_NAME);
        assert_eq!(store.get("travel").unwrap().path, dir.path().join("travel.json"));
    }

    #[test]
    fn test_add_rejects_bad_or_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::load(dir.path(), None).unwrap();

        assert!(store.add("").is_err());
        assert!(store.add("   ").is_err());
        assert!(store.add("../escape").is_err());
        assert!(store.add("dir\\name").is_err());
        assert!(store.add("default").is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_refresh_keeps_active_profile() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), "{}").unwrap();
        let mut store = ProfileStore::load(dir.path(), None).unwrap();
        store.add("c").unwrap();
        store.select("c").unwrap();

        fs::write(dir.path().join("a.json"), "{}").unwrap();
        store.refresh().unwrap();

        assert_eq!(names(&store), vec!["a.json", "b.json", "c.json"]);
        assert_eq!(store.active().unwrap().name, "c.json");
    }
}
