use serde::{Deserialize, Serialize};

/// 从列表页抓取到的一条帖子
///
/// 只在单个扫描周期内有效，不持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedItem {
    /// 平台分配的帖子 ID（来自详情页链接）
    pub id: String,
    /// 作者账号（去掉 `@`，小写）
    pub author: String,
    /// 正文
    pub text: String,
    /// 去重后的图片地址
    pub media: Vec<String>,
    /// 帖子元素的选择器，回复时用来定位（按 ID，刷新后仍有效）
    pub element: String,
}

impl ScrapedItem {
    /// 在帖子元素内部查找子元素的选择器
    pub fn scoped(&self, selector: &str) -> String {
        format!("{} {}", self.element, selector)
    }
}
