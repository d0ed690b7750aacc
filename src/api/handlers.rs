use crate::api::AppState;
use crate::error::{EngineError, EngineResult};
use crate::export;
use crate::models::{LineView, RowError};
use crate::service::card_pricer::parse_quantity_value;
use crate::service::{
    parse_quantity, split_raw_items, ContainerUpdate, EstimateEngine, RawBatchItem,
    SectionTotalView,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 错误响应体
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
}

/// 成功响应体
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

pub fn error_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: EngineError) -> Response {
    let status = error_status(&e);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", e);
    }
    let body = ErrorResponse {
        success: false,
        code: e.error_code(),
        message: e.to_string(),
    };
    (status, Json(body)).into_response()
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(DataResponse { success: true, data })).into_response()
}

fn respond<T: Serialize>(result: Result<T, EngineError>) -> Response {
    match result {
        Ok(data) => ok(data),
        Err(e) => error_response(e),
    }
}

fn internal_error(code: &'static str, message: String) -> Response {
    let body = ErrorResponse {
        success: false,
        code,
        message,
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// 在阻塞线程池上执行计价, 不占用异步 worker
///
/// 任务 panic 或被取消时返回 500。
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, Response>
where
    F: FnOnce(&EstimateEngine) -> T + Send + 'static,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| {
            tracing::error!("Pricing task failed: {}", e);
            internal_error("INTERNAL_ERROR", "pricing task failed".to_string())
        })
}

async fn respond_blocking<T, F>(state: &AppState, f: F) -> Response
where
    F: FnOnce(&EstimateEngine) -> EngineResult<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    match blocking(state, f).await {
        Ok(result) => respond(result),
        Err(response) => response,
    }
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 单行计算请求, 数量可以是 "12,5" 或数字
#[derive(Debug, Deserialize)]
pub struct CalcRequest {
    pub card_id: i64,
    pub quantity: serde_json::Value,
}

/// 单行计算
pub async fn calc_single(
    State(state): State<AppState>,
    Path(estimate_id): Path<i64>,
    Json(req): Json<CalcRequest>,
) -> Response {
    respond_blocking(&state, move |engine| {
        let quantity = parse_quantity_value(&req.quantity)?;
        engine
            .batch()
            .calculate_single(estimate_id, req.card_id, &quantity)
            .map(|line| line.to_view())
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct BatchCalcRequest {
    pub items: Vec<RawBatchItem>,
}

#[derive(Debug, Serialize)]
pub struct BatchRowView {
    pub row_index: i64,
    pub card_id: i64,
    pub quantity: BigDecimal,
    #[serde(flatten)]
    pub view: LineView,
}

#[derive(Debug, Serialize)]
pub struct BatchCalcResponse {
    pub results: Vec<BatchRowView>,
    pub errors: Vec<RowError>,
}

/// 批量计算: 估算单不存在时 404, 否则按行返回结果和错误
pub async fn calc_batch(
    State(state): State<AppState>,
    Path(estimate_id): Path<i64>,
    Json(req): Json<BatchCalcRequest>,
) -> Response {
    respond_blocking(&state, move |engine| {
        let (items, mut errors) = split_raw_items(req.items);
        let outcome = engine.batch().calculate_batch(estimate_id, &items)?;

        errors.extend(outcome.errors);
        errors.sort_by_key(|e| e.row_index);
        let results = outcome
            .results
            .into_iter()
            .map(|r| BatchRowView {
                row_index: r.row_index,
                card_id: r.card_id,
                view: r.result.to_view(),
                quantity: r.quantity,
            })
            .collect();
        Ok(BatchCalcResponse { results, errors })
    })
    .await
}

/// `visible=1,2,3` 限定参与汇总的行
#[derive(Debug, Default, Deserialize)]
pub struct TotalsQuery {
    pub visible: Option<String>,
}

impl TotalsQuery {
    fn visible_rows(&self) -> Result<Option<HashSet<i64>>, EngineError> {
        let Some(raw) = self.visible.as_deref() else {
            return Ok(None);
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>().map_err(|_| {
                    EngineError::invalid_input("visible", s, "row index must be an integer")
                })
            })
            .collect::<Result<HashSet<_>, _>>()
            .map(Some)
    }
}

#[derive(Debug, Serialize)]
pub struct TotalsResponse {
    pub revision: u64,
    pub grand: SectionTotalView,
    pub sections: Vec<SectionTotalView>,
}

/// 章节合计
pub async fn estimate_totals(
    State(state): State<AppState>,
    Path(estimate_id): Path<i64>,
    Query(query): Query<TotalsQuery>,
) -> Response {
    respond_blocking(&state, move |engine| {
        let visible = query.visible_rows()?;
        let priced = engine.price_estimate(estimate_id, visible.as_ref())?;
        Ok(TotalsResponse {
            revision: priced.revision,
            grand: priced.grand_total(),
            sections: priced.section_totals(),
        })
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct AnalysisQuery {
    pub top: Option<usize>,
}

pub async fn estimate_analysis(
    State(state): State<AppState>,
    Path(estimate_id): Path<i64>,
    Query(query): Query<AnalysisQuery>,
) -> Response {
    let top = query.top.unwrap_or(10);
    respond_blocking(&state, move |engine| engine.analyse_estimate(estimate_id, top)).await
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// rows (默认) 或 sections
    pub kind: Option<String>,
}

/// CSV 导出
pub async fn export_csv(
    State(state): State<AppState>,
    Path(estimate_id): Path<i64>,
    Query(query): Query<ExportQuery>,
) -> Response {
    let exported = blocking(&state, move |engine| {
        let priced = engine.price_estimate(estimate_id, None)?;
        let written = match query.kind.as_deref() {
            Some("sections") => export::write_section_totals(&priced.section_totals(), Vec::new()),
            _ => export::write_priced_rows(&priced, Vec::new()),
        };
        Ok::<_, EngineError>(written)
    })
    .await;

    match exported {
        Ok(Ok(Ok(bytes))) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            bytes,
        )
            .into_response(),
        Ok(Ok(Err(e))) => {
            tracing::error!("Estimate {}: CSV export failed: {}", estimate_id, e);
            internal_error("EXPORT_ERROR", e.to_string())
        }
        Ok(Err(e)) => error_response(e),
        Err(response) => response,
    }
}

pub async fn list_overheads(
    State(state): State<AppState>,
    Path(estimate_id): Path<i64>,
) -> Response {
    respond(state.engine.admin().list_overheads(estimate_id))
}

#[derive(Debug, Deserialize)]
pub struct ApplyOverheadRequest {
    pub container_id: i64,
}

pub async fn apply_overhead(
    State(state): State<AppState>,
    Path(estimate_id): Path<i64>,
    Json(req): Json<ApplyOverheadRequest>,
) -> Response {
    respond(
        state
            .engine
            .admin()
            .apply_overhead(estimate_id, req.container_id)
            .await,
    )
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub is_active: bool,
}

pub async fn toggle_overhead(
    State(state): State<AppState>,
    Path((estimate_id, link_id)): Path<(i64, i64)>,
    Json(req): Json<ToggleRequest>,
) -> Response {
    respond(
        state
            .engine
            .admin()
            .toggle_overhead(estimate_id, link_id, req.is_active)
            .await,
    )
}

#[derive(Debug, Deserialize)]
pub struct OverheadQuantityRequest {
    pub quantity: i32,
}

pub async fn set_overhead_quantity(
    State(state): State<AppState>,
    Path((estimate_id, link_id)): Path<(i64, i64)>,
    Json(req): Json<OverheadQuantityRequest>,
) -> Response {
    respond(
        state
            .engine
            .admin()
            .set_overhead_quantity(estimate_id, link_id, req.quantity)
            .await,
    )
}

pub async fn refresh_overhead(
    State(state): State<AppState>,
    Path((estimate_id, link_id)): Path<(i64, i64)>,
) -> Response {
    respond(state.engine.admin().refresh_snapshot(estimate_id, link_id).await)
}

pub async fn delete_overhead(
    State(state): State<AppState>,
    Path((estimate_id, link_id)): Path<(i64, i64)>,
) -> Response {
    respond(state.engine.admin().delete_overhead(estimate_id, link_id).await)
}

pub async fn update_container(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
    Json(update): Json<ContainerUpdate>,
) -> Response {
    respond(state.engine.admin().update_container(container_id, update).await)
}

pub async fn vat_status(State(state): State<AppState>, Path(estimate_id): Path<i64>) -> Response {
    respond(state.engine.admin().vat_status(estimate_id))
}

#[derive(Debug, Deserialize)]
pub struct VatToggleRequest {
    pub active: bool,
}

pub async fn toggle_vat(
    State(state): State<AppState>,
    Path(estimate_id): Path<i64>,
    Json(req): Json<VatToggleRequest>,
) -> Response {
    respond(state.engine.admin().toggle_vat(estimate_id, req.active).await)
}

#[derive(Debug, Deserialize)]
pub struct VatRateRequest {
    pub rate: String,
}

pub async fn set_vat_rate(
    State(state): State<AppState>,
    Path(estimate_id): Path<i64>,
    Json(req): Json<VatRateRequest>,
) -> Response {
    let normalized = req.rate.trim().replace(' ', "").replace(',', ".");
    let rate = match normalized.parse::<BigDecimal>() {
        Ok(r) => r,
        Err(_) => {
            return error_response(EngineError::invalid_input(
                "vat_rate",
                req.rate,
                "not a decimal number",
            ))
        }
    };
    respond(state.engine.admin().set_vat_rate(estimate_id, rate).await)
}

#[derive(Debug, Deserialize)]
pub struct MappingRequest {
    pub card_id: i64,
    pub quantity: String,
}

pub async fn upsert_mapping(
    State(state): State<AppState>,
    Path((estimate_id, row_index)): Path<(i64, i64)>,
    Json(req): Json<MappingRequest>,
) -> Response {
    let quantity = match parse_quantity(&req.quantity) {
        Ok(q) => q,
        Err(e) => return error_response(e),
    };
    respond(
        state
            .engine
            .admin()
            .upsert_mapping(estimate_id, row_index, req.card_id, quantity)
            .await,
    )
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub removed: bool,
}

pub async fn clear_mapping(
    State(state): State<AppState>,
    Path((estimate_id, row_index)): Path<(i64, i64)>,
) -> Response {
    respond(
        state
            .engine
            .admin()
            .clear_mapping(estimate_id, row_index)
            .await
            .map(|removed| ClearedResponse { removed }),
    )
}

#[derive(Debug, Serialize)]
pub struct InvalidatedResponse {
    pub estimate_id: i64,
}

/// 手动失效间接费上下文
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Path(estimate_id): Path<i64>,
) -> Response {
    respond(
        state
            .engine
            .admin()
            .invalidate_overhead_context(estimate_id)
            .map(|_| InvalidatedResponse { estimate_id }),
    )
}
