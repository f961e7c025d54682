//! 账号配置查询 - 业务能力层

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::models::loaders::load_all_profiles;
use crate::models::profile::{normalize_handle, Profile};

/// 按账号名查询回复配置（大小写不敏感）
pub trait ProfileStore: Send + Sync {
    fn lookup(&self, handle: &str) -> Option<Profile>;
}

/// 从 TOML 目录加载的账号配置
#[derive(Debug, Default, Clone)]
pub struct TomlProfileStore {
    by_handle: HashMap<String, Profile>,
}

impl TomlProfileStore {
    pub async fn load(dir: &Path) -> Result<Self> {
        let profiles = load_all_profiles(dir).await?;
        Ok(Self::from_profiles(profiles))
    }

    pub fn from_profiles(profiles: Vec<Profile>) -> Self {
        let mut by_handle = HashMap::new();
        for profile in profiles {
            for key in profile.lookup_keys() {
                if by_handle.insert(key.clone(), profile.clone()).is_some() {
                    debug!("账号 {} 重复配置，使用后加载的一份", key);
                }
            }
        }
        Self { by_handle }
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}

impl ProfileStore for TomlProfileStore {
    fn lookup(&self, handle: &str) -> Option<Profile> {
        self.by_handle.get(&normalize_handle(handle)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let store = TomlProfileStore::from_profiles(vec![Profile {
            username: "NASA".to_string(),
            handles: vec!["nasa_mars".to_string()],
            prompt: "p".to_string(),
            facts: Vec::new(),
        }]);
        assert!(store.lookup("@nasa").is_some());
        assert!(store.lookup("NASA_Mars").is_some());
        assert!(store.lookup("esa").is_none());
        assert_eq!(store.len(), 2);
    }
}
