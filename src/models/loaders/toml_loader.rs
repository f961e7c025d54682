use crate::models::profile::Profile;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

/// 从 TOML 文件加载单个账号配置
pub async fn load_profile(toml_file_path: &Path) -> Result<Profile> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let profile: Profile = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    Ok(profile)
}

/// 从文件夹中加载所有账号配置
///
/// 文件夹不存在时返回空列表；单个文件解析失败只记录警告。
pub async fn load_all_profiles(folder: &Path) -> Result<Vec<Profile>> {
    if !folder.exists() {
        tracing::warn!("账号配置目录不存在: {}", folder.display());
        return Ok(Vec::new());
    }

    let mut profiles = Vec::new();
    let mut entries = fs::read_dir(folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            tracing::debug!(
                "正在加载: {}",
                path.file_name().unwrap_or_default().to_string_lossy()
            );

            match load_profile(&path).await {
                Ok(profile) => profiles.push(profile),
                Err(e) => {
                    tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
                }
            }
        }
    }

    tracing::info!("成功加载 {} 个账号配置", profiles.len());
    Ok(profiles)
}
