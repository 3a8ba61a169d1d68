use super::path::Path;
use std::cmp::Ordering;

/// 某一时刻目录的子条目快照
///
/// 过滤与排序都返回新的列表，缓存中的快照保持不变。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributedList {
    items: Vec<Path>,
}

impl AttributedList {
    pub fn new(items: Vec<Path>) -> Self {
        Self { items }
    }

    pub fn push(&mut self, item: Path) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Path> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Path] {
        &self.items
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Path> {
        self.items.iter().find(|p| p.name() == name)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.items.iter().any(|p| p == path)
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(Path::name).collect()
    }

    pub fn filter<F>(&self, predicate: F) -> AttributedList
    where
        F: Fn(&Path) -> bool,
    {
        self.items.iter().filter(|p| predicate(p)).cloned().collect()
    }

    pub fn sorted_by<C>(&self, comparator: C) -> AttributedList
    where
        C: FnMut(&Path, &Path) -> Ordering,
    {
        let mut items = self.items.clone();
        items.sort_by(comparator);
        Self { items }
    }

    /// 先过滤再排序
    pub fn filtered<C, F>(&self, comparator: C, predicate: F) -> AttributedList
    where
        C: FnMut(&Path, &Path) -> Ordering,
        F: Fn(&Path) -> bool,
    {
        let mut items: Vec<Path> = self.items.iter().filter(|p| predicate(p)).cloned().collect();
        items.sort_by(comparator);
        Self { items }
    }
}

impl FromIterator<Path> for AttributedList {
    fn from_iter<I: IntoIterator<Item = Path>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for AttributedList {
    type Item = Path;
    type IntoIter = std::vec::IntoIter<Path>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a AttributedList {
    type Item = &'a Path;
    type IntoIter = std::slice::Iter<'a, Path>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attributes, PathType};

    fn listing() -> AttributedList {
        let dir = Path::from_absolute("/d", PathType::Directory);
        vec![
            Path::child(&dir, "c.txt", PathType::File)
                .with_attributes(Attributes::default().with_size(3)),
            Path::child(&dir, "a.txt", PathType::File)
                .with_attributes(Attributes::default().with_size(1)),
            Path::child(&dir, "b", PathType::Directory),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_filter_and_sort_leave_snapshot_untouched() {
        let list = listing();
        let files = list.filtered(|a, b| a.name().cmp(b.name()), |p| p.is_file());

        assert_eq!(files.names(), vec!["a.txt", "c.txt"]);
        assert_eq!(list.names(), vec!["c.txt", "a.txt", "b"]);
    }

    #[test]
    fn test_find_by_name() {
        let list = listing();
        assert_eq!(list.find_by_name("a.txt").map(Path::size), Some(1));
        assert!(list.find_by_name("missing").is_none());
    }
}
