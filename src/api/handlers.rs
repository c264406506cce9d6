// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::api::server::AppState;
use crate::importer::sheet::SheetFormat;
use crate::importer::{ImportKind, ImportPipeline};
use actix_web::{http::header, web, HttpRequest, HttpResponse, Result};

/// Health check endpoint
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let db_status = if state.db.ping().await {
        "connected"
    } else {
        "disconnected"
    };

    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: db_status.to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
    });

    Ok(HttpResponse::Ok().json(response))
}

fn upload_format(req: &HttpRequest, query: &ImportQuery) -> Option<SheetFormat> {
    if let Some(f) = query.format.as_deref() {
        return match f.trim().to_ascii_lowercase().as_str() {
            "csv" | "txt" => Some(SheetFormat::Csv),
            "xlsx" => Some(SheetFormat::Xlsx),
            _ => None,
        };
    }
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(SheetFormat::from_mime)
}

/// Runs a whole import for the uploaded sheet and answers with its outcome.
pub async fn import_sheet(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<ImportQuery>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let kind: ImportKind = match path.into_inner().parse() {
        Ok(k) => k,
        Err(e) => return Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(e.to_string()))),
    };
    let Some(format) = upload_format(&req, &query) else {
        return Ok(HttpResponse::UnsupportedMediaType().json(ApiResponse::<()>::error(
            "send text/csv or an xlsx workbook, or pass ?format=csv|xlsx",
        )));
    };
    if body.is_empty() {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error("empty upload")));
    }

    tracing::info!(kind = %kind, bytes = body.len(), ?format, "Import upload received");

    let mut pipeline = ImportPipeline::new(
        state.db.clone(),
        state.resolver.clone(),
        state.config.clone(),
    );
    let max_runtime = state.config.max_runtime;
    let finished =
        tokio::time::timeout(max_runtime, pipeline.run_bytes(kind, &body, format)).await;

    match finished {
        Ok(Ok(outcome)) => Ok(HttpResponse::Ok().json(ApiResponse::success(outcome))),
        Ok(Err(e)) => {
            tracing::error!(kind = %kind, error = %format!("{e:#}"), "Import failed");
            Ok(HttpResponse::UnprocessableEntity().json(ApiResponse::<()>::error(format!("{e:#}"))))
        }
        Err(_) => {
            tracing::error!(kind = %kind, phase = %pipeline.phase(), "Import exceeded runtime ceiling");
            Ok(HttpResponse::GatewayTimeout().json(ApiResponse::<()>::error(format!(
                "import abandoned after {}s",
                max_runtime.as_secs()
            ))))
        }
    }
}
