//! 冲突文件命名

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 查找不冲突名称时的最大尝试次数
const MAX_ALTERNATES: u32 = 1000;

/// 冲突发生在哪一侧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSide {
    Local,
    Remote,
}

impl std::fmt::Display for ConflictSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictSide::Local => write!(f, "local"),
            ConflictSide::Remote => write!(f, "remote"),
        }
    }
}

impl From<&str> for ConflictSide {
    fn from(s: &str) -> Self {
        match s {
            "remote" => ConflictSide::Remote,
            _ => ConflictSide::Local,
        }
    }
}

/// 拆分主名与扩展名，隐藏文件（如 `.bashrc`）没有扩展名
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => (&name[..pos], Some(&name[pos + 1..])),
        _ => (name, None),
    }
}

fn join_extension(stem: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

/// `report.pdf` -> `report (2).pdf`
pub fn alternate_name(name: &str, n: u32) -> String {
    let (stem, ext) = split_extension(name);
    join_extension(&format!("{} ({})", stem, n), ext)
}

/// `report.pdf` -> `report_conflict_local_20240101_120000.pdf`
pub fn displaced_name(name: &str, side: ConflictSide, timestamp: i64) -> String {
    let dt = chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|d| d.format("%Y%m%d_%H%M%S").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let (stem, ext) = split_extension(name);
    join_extension(&format!("{}_conflict_{}_{}", stem, side, dt), ext)
}

/// 依次尝试 `name (1)`、`name (2)` …，直到 `exists` 返回 false
pub fn find_alternate<F>(name: &str, exists: F) -> String
where
    F: Fn(&str) -> bool,
{
    for n in 1..=MAX_ALTERNATES {
        let candidate = alternate_name(name, n);
        if !exists(&candidate) {
            return candidate;
        }
    }
    let (stem, ext) = split_extension(name);
    join_extension(&format!("{} ({})", stem, Uuid::new_v4()), ext)
}

/// 冲突名本身已被占用时，再附加序号
pub fn find_displaced<F>(name: &str, side: ConflictSide, timestamp: i64, exists: F) -> String
where
    F: Fn(&str) -> bool,
{
    let candidate = displaced_name(name, side, timestamp);
    if exists(&candidate) {
        find_alternate(&candidate, exists)
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("a.txt"), ("a", Some("txt")));
        assert_eq!(split_extension("a.tar.gz"), ("a.tar", Some("gz")));
        assert_eq!(split_extension(".bashrc"), (".bashrc", None));
        assert_eq!(split_extension("README"), ("README", None));
        assert_eq!(split_extension("trailing."), ("trailing.", None));
    }

    #[test]
    fn test_alternate_names() {
        assert_eq!(alternate_name("report.pdf", 1), "report (1).pdf");
        assert_eq!(alternate_name("README", 3), "README (3)");

        let taken = ["a (1).txt", "a (2).txt"];
        assert_eq!(find_alternate("a.txt", |n| taken.contains(&n)), "a (3).txt");
    }

    #[test]
    fn test_displaced_name() {
        // 2024-01-02 03:04:05 UTC
        let ts = 1704164645;
        assert_eq!(
            displaced_name("report.pdf", ConflictSide::Local, ts),
            "report_conflict_local_20240102_030405.pdf"
        );
        assert_eq!(
            displaced_name("Makefile", ConflictSide::Remote, ts),
            "Makefile_conflict_remote_20240102_030405"
        );

        let first = displaced_name("a.txt", ConflictSide::Local, ts);
        let found = find_displaced("a.txt", ConflictSide::Local, ts, |n| n == first);
        assert_eq!(found, "a_conflict_local_20240102_030405 (1).txt");
    }
}
