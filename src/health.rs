//! 健康检查接口。

use axum::response::Json as JsonResponse;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInfo {
    status: &'static str,
    message: &'static str,
    version: &'static str,
    build_time: &'static str,
}

pub async fn health() -> JsonResponse<HealthInfo> {
    JsonResponse(HealthInfo {
        status: "ok",
        message: "Product catalog server is running",
        version: crate::build::PKG_VERSION,
        build_time: crate::build::BUILD_TIME,
    })
}
