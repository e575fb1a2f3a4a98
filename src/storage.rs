//! 上传目录布局与路径解析。

use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::config::{AUDIO_DIR, IMAGES_DIR, UPLOADS_URL_PREFIX};

/// 上传根目录，以只读方式挂载在 `/uploads` 下。
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(self.root.join(IMAGES_DIR)).await?;
        fs::create_dir_all(self.root.join(AUDIO_DIR)).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 解析相对路径，并拒绝沿途的符号链接；目标必须存在。
    async fn resolve_path_checked(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target).await?;
        Ok(target)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath);
        }

        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            let metadata = fs::symlink_metadata(&current).await?;
            if metadata.file_type().is_symlink() {
                return Err(StorageError::InvalidPath);
            }
            if components.peek().is_some() && !metadata.is_dir() {
                return Err(StorageError::InvalidPath);
            }
        }

        Ok(())
    }

    /// 将公开的 `/uploads/...` URL 映射回上传根目录内的文件。
    pub async fn resolve_public_url(&self, url: &str) -> Result<PathBuf, StorageError> {
        let relative = url
            .strip_prefix(UPLOADS_URL_PREFIX)
            .ok_or(StorageError::InvalidPath)?;
        self.resolve_path_checked(relative).await
    }

    /// 删除公开 URL 对应的上传文件。
    pub async fn remove_public_file(&self, url: &str) -> Result<(), StorageError> {
        let target = self.resolve_public_url(url).await?;
        if fs::metadata(&target).await?.is_dir() {
            return Err(StorageError::InvalidPath);
        }
        fs::remove_file(target).await?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
