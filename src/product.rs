//! 商品记录：强类型的保留字段加上客户端自由字段。

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::UPLOADS_URL_PREFIX;

/// 由服务端维护的字段，客户端传入的值会被丢弃。
pub const RESERVED_FIELDS: [&str; 3] = ["id", "createdAt", "updatedAt"];

/// 可能引用上传文件的字段。
pub const UPLOAD_FIELDS: [&str; 2] = ["image", "audioFile"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    pub fn new(id: u64, fields: Map<String, Value>, now: DateTime<Utc>) -> Self {
        Self {
            fields: strip_reserved(fields),
            id,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// 将 `patch` 覆盖到客户端字段上，并更新 `updatedAt`。
    pub fn apply_patch(&mut self, patch: Map<String, Value>, now: DateTime<Utc>) {
        for (key, value) in strip_reserved(patch) {
            self.fields.insert(key, value);
        }
        self.updated_at = Some(now);
    }

    /// 该商品引用的上传文件 URL。
    pub fn upload_refs(&self) -> impl Iterator<Item = &str> {
        UPLOAD_FIELDS
            .iter()
            .filter_map(|key| self.fields.get(*key))
            .filter_map(Value::as_str)
            .filter(|url| url.starts_with(UPLOADS_URL_PREFIX))
    }
}

/// 当前时间，精确到毫秒。
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn strip_reserved(mut fields: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_FIELDS {
        fields.remove(key);
    }
    fields
}
