use serde::{Deserialize, Serialize};

/// 被监控账号的回复配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// 主账号名
    pub username: String,
    /// 其他可匹配的账号名
    #[serde(default)]
    pub handles: Vec<String>,
    /// 提示词模板，支持 `{{POST_TEXT}}` 和 `{{FACT}}` 占位符
    pub prompt: String,
    /// 可随机插入模板的事实
    #[serde(default)]
    pub facts: Vec<String>,
}

impl Profile {
    /// 所有查找键（小写、去掉 `@`）
    pub fn lookup_keys(&self) -> Vec<String> {
        std::iter::once(&self.username)
            .chain(self.handles.iter())
            .map(|handle| normalize_handle(handle))
            .filter(|key| !key.is_empty())
            .collect()
    }
}

/// 统一账号名格式：去掉 `@` 与空白并转小写
pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').trim().to_lowercase()
}
