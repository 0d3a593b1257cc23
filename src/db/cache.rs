use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::handle::{DatabaseHandle, DbTarget};

/// 句柄缓存：同一组连接参数只建一次连接，直到过期。
/// 键是完整的 DbTarget，换库、换用户、换密码都会换到新条目
pub struct HandleCache {
    entries: HashMap<DbTarget, CacheEntry>,
    ttl: Duration,
}

struct CacheEntry {
    handle: Arc<DatabaseHandle>,
    created_at: Instant,
}

impl HandleCache {
    pub fn new(ttl: Duration) -> Self {
        HandleCache {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// 取目标对应的句柄：新鲜的直接复用，过期或没有就重新连接
    pub async fn resolve(&mut self, target: &DbTarget) -> Result<Arc<DatabaseHandle>> {
        if let Some(entry) = self.entries.get(target) {
            if entry.created_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&entry.handle));
            }
        }

        self.entries.remove(target);
        let handle = Arc::new(DatabaseHandle::connect(target).await?);
        self.entries.insert(
            target.clone(),
            CacheEntry {
                handle: Arc::clone(&handle),
                created_at: Instant::now(),
            },
        );
        Ok(handle)
    }

    /// 目标当前是否有未过期的缓存条目（不触发连接）
    pub fn is_cached(&self, target: &DbTarget) -> bool {
        self.entries
            .get(target)
            .map(|entry| entry.created_at.elapsed() < self.ttl)
            .unwrap_or(false)
    }
}
