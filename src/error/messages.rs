//! 面向用户的错误提示文本

use serde::{Deserialize, Serialize};

/// 界面语言
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "zh-CN")]
    ZhCn,
    #[serde(rename = "en")]
    En,
}

/// 英文原文 -> 简体中文
const ZH_CN: &[(&str, &str)] = &[
    ("Connection failed", "连接失败"),
    ("Access denied", "访问被拒绝"),
    ("File not found", "文件不存在"),
    ("Invalid filename", "文件名无效"),
    ("Cancelled", "已取消"),
    ("Cannot create {0}", "无法创建 {0}"),
    ("Cannot delete {0}", "无法删除 {0}"),
    ("Cannot rename {0}", "无法重命名 {0}"),
    ("Listing directory {0} failed", "列出目录 {0} 失败"),
    ("Download {0} failed", "下载 {0} 失败"),
    ("Upload {0} failed", "上传 {0} 失败"),
    ("Failure to read attributes of {0}", "读取 {0} 的属性失败"),
    ("Failure to write attributes of {0}", "写入 {0} 的属性失败"),
    ("Cannot share {0}", "无法共享 {0}"),
    ("Unsupported operation for {0}", "{0} 不支持此操作"),
    ("Too many levels of symbolic links {0}", "符号链接 {0} 层级过多"),
];

/// 按语言查找提示文本，`{0}`、`{1}` 为占位符
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Messages {
    locale: Locale,
}

impl Messages {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// 未收录的文本原样返回
    pub fn localize(&self, key: &str) -> String {
        match self.locale {
            Locale::En => key.to_string(),
            Locale::ZhCn => ZH_CN
                .iter()
                .find(|(en, _)| *en == key)
                .map(|(_, zh)| (*zh).to_string())
                .unwrap_or_else(|| key.to_string()),
        }
    }

    pub fn format(&self, key: &str, args: &[&str]) -> String {
        let mut text = self.localize(key);
        for (i, arg) in args.iter().enumerate() {
            text = text.replace(&format!("{{{}}}", i), arg);
        }
        text
    }
}
