//! 商品增删改查处理器。

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Extension, Json, Path};
use axum::http::StatusCode;
use axum::response::Json as JsonResponse;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::{CatalogError, CatalogStore};
use crate::error::ApiError;
use crate::product::Product;
use crate::storage::Storage;

type CategoryPath = Result<Path<String>, PathRejection>;
type ProductPath = Result<Path<(String, String)>, PathRejection>;
type ProductBody = Result<Json<Map<String, Value>>, JsonRejection>;

#[derive(Serialize)]
pub(crate) struct DeleteResponse {
    message: &'static str,
}

/// 非数字 id 不可能匹配任何商品，按未找到处理。
fn parse_id(raw: &str) -> Result<u64, ApiError> {
    raw.parse::<u64>()
        .map_err(|_| ApiError::from(CatalogError::NotFound))
}

/// 列出分类下的全部商品。
pub async fn list_products(
    path: CategoryPath,
    Extension(catalog): Extension<Arc<CatalogStore>>,
) -> Result<JsonResponse<Vec<Product>>, ApiError> {
    let Path(category) = path?;
    let products = catalog.list(&category).await?;
    info!(category, count = products.len(), "list products");
    Ok(JsonResponse(products))
}

pub async fn get_product(
    path: ProductPath,
    Extension(catalog): Extension<Arc<CatalogStore>>,
) -> Result<JsonResponse<Product>, ApiError> {
    let Path((category, id)) = path?;
    let id = parse_id(&id)?;
    Ok(JsonResponse(catalog.get(&category, id).await?))
}

/// 创建商品，返回 201。
pub async fn create_product(
    path: CategoryPath,
    Extension(catalog): Extension<Arc<CatalogStore>>,
    payload: ProductBody,
) -> Result<(StatusCode, JsonResponse<Product>), ApiError> {
    let Path(category) = path?;
    let Json(fields) = payload?;
    let product = catalog.create(&category, fields).await?;
    Ok((StatusCode::CREATED, JsonResponse(product)))
}

/// 部分更新：未提供的字段保留原值。
pub async fn update_product(
    path: ProductPath,
    Extension(catalog): Extension<Arc<CatalogStore>>,
    payload: ProductBody,
) -> Result<JsonResponse<Product>, ApiError> {
    let Path((category, id)) = path?;
    let id = parse_id(&id)?;
    let Json(patch) = payload?;
    Ok(JsonResponse(catalog.update(&category, id, patch).await?))
}

/// 删除商品，并尽力清理其引用的上传文件。
pub async fn delete_product(
    path: ProductPath,
    Extension(catalog): Extension<Arc<CatalogStore>>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<DeleteResponse>, ApiError> {
    let Path((category, id)) = path?;
    let id = parse_id(&id)?;
    let removed = catalog.remove(&category, id).await?;
    for url in removed.upload_refs() {
        match storage.remove_public_file(url).await {
            Ok(()) => info!(category, id, url, "removed product upload"),
            Err(err) => warn!(category, id, url, error = ?err, "failed to remove product upload"),
        }
    }
    Ok(JsonResponse(DeleteResponse {
        message: "Product deleted successfully",
    }))
}
