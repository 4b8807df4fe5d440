//! 键值持久化适配器
//!
//! 每个键保存一份完整的 JSON 文档，只支持整文档读写。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use endo_core::{EndoError, Result};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// 持久化键名
pub mod keys {
    pub const AUTH: &str = "endo_auth";
    pub const PATIENTS: &str = "endo_patients";
    pub const DOCTORS: &str = "endo_doctors";
    pub const ASSISTANTS: &str = "endo_assistants";
    pub const SETTINGS: &str = "endo_settings";
    pub const LOCALE: &str = "endo_locale";
}

/// 键值存储接口
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 读取整文档，键不存在时返回 `None`
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// 覆盖写入整文档
    async fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// 删除键
    async fn remove(&self, key: &str) -> Result<()>;
}

/// 内存键值存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// 文件键值存储：每个键对应数据目录下的一个 `<key>.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-')) {
            return Err(EndoError::Storage(format!("Invalid storage key: {:?}", key)));
        }
        Ok(self.base_path.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.key_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.key_path(key)?;
        tokio::fs::create_dir_all(&self.base_path).await?;

        // 先写临时文件再重命名，避免写入中断留下半个文档
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec(value)?).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!("Stored key {} at {}", key, path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
