use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

use crate::search::{CacheKey, SearchResult};

/// 固定容量的 LRU 缓存
///
/// 键是完整的查询参数元组，不同阈值或不同查询内容属于不同条目。
/// 容量满时淘汰最久未使用的条目。
pub struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self { capacity, map: HashMap::new(), order: VecDeque::new() }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        if !self.map.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.map.get(key).cloned()
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.map.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push_back(key);
        if self.map.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
    }
}

/// 每种查询形态一个缓存实例，统一整体清空
///
/// 扫描完成或显式请求时全部清空；单条素材写入不做失效，
/// 在下一次整体清空前允许返回过期结果。
pub struct SearchCaches {
    caches: [Mutex<LruCache<CacheKey, Vec<SearchResult>>>; 6],
}

/// 查询形态，用于选择缓存实例
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheShape {
    TextImage = 0,
    ImageImage = 1,
    TextVideo = 2,
    ImageVideo = 3,
    PathImage = 4,
    PathVideo = 5,
}

impl SearchCaches {
    pub fn new(capacity: usize) -> Self {
        Self { caches: std::array::from_fn(|_| Mutex::new(LruCache::new(capacity))) }
    }

    pub fn get(&self, shape: CacheShape, key: &CacheKey) -> Option<Vec<SearchResult>> {
        self.caches[shape as usize].lock().unwrap().get(key)
    }

    pub fn put(&self, shape: CacheShape, key: CacheKey, value: Vec<SearchResult>) {
        self.caches[shape as usize].lock().unwrap().put(key, value);
    }

    /// 清空所有形态的缓存
    pub fn clear_all(&self) {
        for cache in &self.caches {
            cache.lock().unwrap().clear();
        }
    }

    pub fn total_entries(&self) -> usize {
        self.caches.iter().map(|c| c.lock().unwrap().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        // 访问 1 使其变为最近使用
        assert_eq!(cache.get(&1), Some("a"));
        cache.put(3, "c");
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&3), Some("c"));
    }

    #[test]
    fn put_overwrites_existing_key() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        cache.put(1, "b");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&1), Some("b"));
    }

    #[test]
    fn clear_removes_everything() {
        let mut cache = LruCache::new(4);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&1), None);
    }
}
