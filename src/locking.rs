//! 内存中的分类锁，串行化同一分类的读-改-写过程。

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time;

/// 按分类名索引的异步互斥锁，无人持有或等待的条目会被回收。
#[derive(Debug, Default)]
pub struct LockManager {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// 等待锁超时。
#[derive(Debug)]
pub struct LockTimeout;

/// 分类锁守卫，释放时顺带清理空闲条目。
#[derive(Debug)]
pub struct CategoryGuard<'a> {
    manager: &'a LockManager,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CategoryGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.manager.prune(&self.key);
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock_with_timeout(
        &self,
        category: &str,
        timeout: Duration,
    ) -> Result<CategoryGuard<'_>, LockTimeout> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(category.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        match time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(CategoryGuard {
                manager: self,
                key: category.to_string(),
                guard: Some(guard),
            }),
            Err(_) => {
                self.prune(category);
                Err(LockTimeout)
            }
        }
    }

    /// 只剩表内引用时移除条目；等待者持有克隆，因此不会被误删。
    fn prune(&self, key: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
