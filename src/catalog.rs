//! 按分类存储的 JSON 商品目录，以及其上的商品操作。

use serde_json::{Map, Value};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::io::ErrorKind;
use tracing::{debug, info};

use crate::atomic::write_atomic;
use crate::config::{DEFAULT_LOCK_WAIT_TIMEOUT_SECS, MAX_CATEGORY_LEN};
use crate::locking::{CategoryGuard, LockManager};
use crate::product::{Product, timestamp_now};

#[derive(Debug)]
pub enum CatalogError {
    InvalidCategory,
    NotFound,
    Busy,
    Io(io::Error),
    Malformed(serde_json::Error),
}

impl From<io::Error> for CatalogError {
    fn from(err: io::Error) -> Self {
        CatalogError::Io(err)
    }
}

/// 目录文件位于 `<root>/products_<category>.json`。
#[derive(Debug)]
pub struct CatalogStore {
    root: PathBuf,
    locks: LockManager,
    locking: bool,
    lock_timeout: Duration,
}

impl CatalogStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: LockManager::new(),
            locking: true,
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_WAIT_TIMEOUT_SECS),
        }
    }

    /// 关闭分类锁；并发写入可能丢失更新。
    pub fn unlocked(mut self) -> Self {
        self.locking = false;
        self
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn catalog_path(&self, category: &str) -> Result<PathBuf, CatalogError> {
        if !is_valid_category(category) {
            return Err(CatalogError::InvalidCategory);
        }
        Ok(self.root.join(format!("products_{category}.json")))
    }

    /// 读取目录；文件不存在视为空目录。
    pub async fn load(&self, category: &str) -> Result<Vec<Product>, CatalogError> {
        let path = self.catalog_path(category)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(CatalogError::Io(err)),
        };
        serde_json::from_slice(&bytes).map_err(CatalogError::Malformed)
    }

    /// 整体替换目录文件。
    pub async fn save(&self, category: &str, products: &[Product]) -> Result<(), CatalogError> {
        let path = self.catalog_path(category)?;
        let content = serde_json::to_vec_pretty(products).map_err(CatalogError::Malformed)?;
        fs::create_dir_all(&self.root).await?;
        write_atomic(&path, &content).await?;
        debug!(category, count = products.len(), "catalog saved");
        Ok(())
    }

    async fn guard(&self, category: &str) -> Result<Option<CategoryGuard<'_>>, CatalogError> {
        if !is_valid_category(category) {
            return Err(CatalogError::InvalidCategory);
        }
        if !self.locking {
            return Ok(None);
        }
        self.locks
            .lock_with_timeout(category, self.lock_timeout)
            .await
            .map(Some)
            .map_err(|_| CatalogError::Busy)
    }

    pub async fn list(&self, category: &str) -> Result<Vec<Product>, CatalogError> {
        let _guard = self.guard(category).await?;
        self.load(category).await
    }

    pub async fn get(&self, category: &str, id: u64) -> Result<Product, CatalogError> {
        let _guard = self.guard(category).await?;
        self.load(category)
            .await?
            .into_iter()
            .find(|product| product.id == id)
            .ok_or(CatalogError::NotFound)
    }

    pub async fn create(
        &self,
        category: &str,
        fields: Map<String, Value>,
    ) -> Result<Product, CatalogError> {
        let _guard = self.guard(category).await?;
        let mut products = self.load(category).await?;
        let id = products.iter().map(|product| product.id).max().unwrap_or(0) + 1;
        let product = Product::new(id, fields, timestamp_now());
        products.push(product.clone());
        self.save(category, &products).await?;
        info!(category, id, "product created");
        Ok(product)
    }

    pub async fn update(
        &self,
        category: &str,
        id: u64,
        patch: Map<String, Value>,
    ) -> Result<Product, CatalogError> {
        let _guard = self.guard(category).await?;
        let mut products = self.load(category).await?;
        let product = products
            .iter_mut()
            .find(|product| product.id == id)
            .ok_or(CatalogError::NotFound)?;
        product.apply_patch(patch, timestamp_now());
        let updated = product.clone();
        self.save(category, &products).await?;
        info!(category, id, "product updated");
        Ok(updated)
    }

    /// 删除商品并返回，供调用方清理其上传文件。
    pub async fn remove(&self, category: &str, id: u64) -> Result<Product, CatalogError> {
        let _guard = self.guard(category).await?;
        let mut products = self.load(category).await?;
        let index = products
            .iter()
            .position(|product| product.id == id)
            .ok_or(CatalogError::NotFound)?;
        let removed = products.remove(index);
        self.save(category, &products).await?;
        info!(category, id, "product deleted");
        Ok(removed)
    }
}

fn is_valid_category(category: &str) -> bool {
    !category.is_empty()
        && category.len() <= MAX_CATEGORY_LEN
        && category
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
