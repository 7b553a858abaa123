use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::User;

/// Consider cache stale after 5 minutes.
/// Matches how long the front-end trusts a fetched query before refetching.
const CACHE_STALE_MINUTES: i64 = 5;

/// Extension used for cache entries
const CACHE_EXT: &str = "json";

/// Capability to drop every cached server-derived value.
///
/// Held by the session store so that a logout never leaves one principal's
/// data visible to the next.
pub trait CacheInvalidator: Send + Sync {
    fn clear_all(&self) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() >= CACHE_STALE_MINUTES
    }
}

pub struct CacheManager {
    cache_dir: PathBuf,
}

impl CacheManager {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", name, CACHE_EXT))
    }

    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", name))?;

        let cached: CachedData<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", name))?;

        Ok(Some(cached))
    }

    pub fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let cached = CachedData::new(data);
        let path = self.cache_path(name);
        let contents = serde_json::to_string_pretty(&cached)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write cache file: {}", name))?;
        Ok(())
    }

    // ===== Profile =====

    pub fn load_profile(&self) -> Result<Option<CachedData<User>>> {
        self.load("profile")
    }

    pub fn save_profile(&self, user: &User) -> Result<()> {
        self.save("profile", user)
    }

    /// Names of every entry currently cached
    pub fn entries(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.cache_dir).context("Failed to list cache directory")? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CACHE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl CacheInvalidator for CacheManager {
    fn clear_all(&self) -> Result<()> {
        if !self.cache_dir.exists() {
            return Ok(());
        }
        let mut removed = 0usize;
        for name in self.entries()? {
            let path = self.cache_path(&name);
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove cache file: {}", name))?;
            debug!(cache = %name, "Evicted cache entry");
            removed += 1;
        }
        info!(removed, "Cache cleared");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn scratch_cache() -> CacheManager {
        let n = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("urbanbook-cache-{}-{}", std::process::id(), n));
        CacheManager::new(dir).unwrap()
    }

    #[test]
    fn test_cached_data_age_display_just_now() {
        let cached = CachedData::new(vec![1, 2, 3]);
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_cached_data_age_display_units() {
        let mut cached = CachedData::new(1);
        cached.cached_at = Utc::now() - Duration::minutes(12);
        assert_eq!(cached.age_display(), "12m ago");

        cached.cached_at = Utc::now() - Duration::minutes(125);
        assert_eq!(cached.age_display(), "2h ago");

        cached.cached_at = Utc::now() - Duration::days(3);
        assert_eq!(cached.age_display(), "3d ago");
    }

    #[test]
    fn test_cached_data_is_stale() {
        let fresh = CachedData::new(vec![1]);
        assert!(!fresh.is_stale());

        let mut old = CachedData::new(vec![1]);
        old.cached_at = Utc::now() - Duration::minutes(6);
        assert!(old.is_stale());
    }

    #[test]
    fn test_profile_round_trip() {
        let cache = scratch_cache();
        assert!(cache.load_profile().unwrap().is_none());

        let user = User::new("u1", "a@b.com", "A");
        cache.save_profile(&user).unwrap();

        let cached = cache.load_profile().unwrap().expect("profile should be cached");
        assert_eq!(cached.data, user);
        assert!(!cached.is_stale());

        let _ = std::fs::remove_dir_all(cache.dir());
    }

    #[test]
    fn test_clear_all_evicts_every_entry() {
        let cache = scratch_cache();
        cache.save_profile(&User::new("u1", "a@b.com", "A")).unwrap();
        cache.save("bookings", &vec!["b1", "b2"]).unwrap();
        std::fs::write(cache.dir().join("notes.txt"), "keep").unwrap();
        assert_eq!(cache.entries().unwrap(), vec!["bookings", "profile"]);

        cache.clear_all().unwrap();

        assert!(cache.entries().unwrap().is_empty());
        assert!(cache.load_profile().unwrap().is_none());
        assert!(cache.load::<Vec<String>>("bookings").unwrap().is_none());
        // Only cache entries are touched
        assert!(cache.dir().join("notes.txt").exists());

        let _ = std::fs::remove_dir_all(cache.dir());
    }
}
