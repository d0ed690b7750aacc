pub mod handlers;

pub use handlers::*;

use crate::service::EstimateEngine;
use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;

/// 共享状态
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<EstimateEngine>,
}

impl AppState {
    pub fn new(engine: Arc<EstimateEngine>) -> Self {
        Self { engine }
    }
}

/// 构建路由
pub fn router(state: AppState) -> Router {
    // 计价与汇总
    let calc_routes = Router::new()
        .route("/api/estimates/:id/calc", post(calc_single))
        .route("/api/estimates/:id/calc/batch", post(calc_batch))
        .route("/api/estimates/:id/totals", get(estimate_totals))
        .route("/api/estimates/:id/analysis", get(estimate_analysis))
        .route("/api/estimates/:id/export.csv", get(export_csv))
        .route("/api/estimates/:id/cache/invalidate", post(invalidate_cache));

    // 间接费 / 增值税 / 行映射
    let admin_routes = Router::new()
        .route(
            "/api/estimates/:id/overheads",
            get(list_overheads).post(apply_overhead),
        )
        .route(
            "/api/estimates/:id/overheads/:link_id",
            delete(delete_overhead),
        )
        .route(
            "/api/estimates/:id/overheads/:link_id/toggle",
            post(toggle_overhead),
        )
        .route(
            "/api/estimates/:id/overheads/:link_id/quantity",
            post(set_overhead_quantity),
        )
        .route(
            "/api/estimates/:id/overheads/:link_id/refresh",
            post(refresh_overhead),
        )
        .route("/api/overhead-containers/:id", patch(update_container))
        .route("/api/estimates/:id/vat", get(vat_status))
        .route("/api/estimates/:id/vat/toggle", post(toggle_vat))
        .route("/api/estimates/:id/vat/rate", post(set_vat_rate))
        .route(
            "/api/estimates/:id/mappings/:row_index",
            put(upsert_mapping).delete(clear_mapping),
        );

    Router::new()
        .route("/health", get(health_check))
        .merge(calc_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(ServiceBuilder::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{
        CardMarkups, Estimate, EstimateRow, OverheadCostContainer, ResourceLine, RowMapping,
        TechnicalCard, TechnicalCardVersion, VatConfig,
    };
    use crate::store::EstimateStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use bigdecimal::BigDecimal;
    use serde_json::{json, Value};
    use std::str::FromStr;
    use tower::ServiceExt;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn state() -> AppState {
        let store = Arc::new(EstimateStore::new());
        store.insert_card(TechnicalCard {
            id: 1,
            name: "Штукатурка".to_string(),
            unit: "м2".to_string(),
            markups: CardMarkups::default(),
            versions: vec![TechnicalCardVersion {
                id: 10,
                version: 1,
                is_published: true,
                materials: vec![ResourceLine::new(dec("2"), dec("50"))],
                works: vec![ResourceLine::new(dec("1"), dec("30"))],
            }],
        });
        store.insert_container(OverheadCostContainer {
            id: 1,
            name: "НР".to_string(),
            materials_pct: dec("10"),
            works_pct: dec("20"),
            total: dec("1000"),
            is_active: true,
        });
        let mut estimate = Estimate::new(1, "Смета", VatConfig::inactive());
        estimate.rows.push(EstimateRow {
            row_index: 1,
            name: "Штукатурка стен".to_string(),
            unit: "м2".to_string(),
            section_path: Some("Отделка".to_string()),
        });
        estimate.mappings.push(RowMapping { row_index: 1, card_id: 1, quantity: dec("10") });
        store.insert_estimate(estimate);

        let engine = Arc::new(EstimateEngine::new(store, None, &EngineConfig::default()));
        AppState::new(engine)
    }

    fn app() -> Router {
        router(state())
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_calc_single_returns_ordered_view() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/estimates/1/calc",
            Some(json!({"card_id": 1, "quantity": "10,0"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["order"][0], json!("UNIT_PRICE_OF_MATERIAL"));
        assert_eq!(body["order"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/estimates/1/calc",
            Some(json!({"card_id": 99, "quantity": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["code"], json!("NOT_FOUND"));

        let (status, body) = send(
            &app,
            "POST",
            "/api/estimates/1/calc",
            Some(json!({"card_id": 1, "quantity": "-3"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("INVALID_INPUT"));
    }

    #[tokio::test]
    async fn test_batch_partial_success() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/estimates/1/calc/batch",
            Some(json!({"items": [
                {"row_index": 1, "card_id": 1, "quantity": 10},
                {"row_index": 2, "card_id": 99, "quantity": 1},
                {"row_index": 3, "card_id": 1, "quantity": "abc"}
            ]})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
        let errors = body["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["row_index"], json!(2));
        assert_eq!(errors[1]["code"], json!("INVALID_INPUT"));

        let empty = Some(json!({"items": []}));
        let (status, _) = send(&app, "POST", "/api/estimates/9/calc/batch", empty).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_overhead_flow_changes_totals() {
        let app = app();
        let (_, before) = send(&app, "GET", "/api/estimates/1/totals", None).await;
        assert_eq!(before["grand"]["total"], json!("1300.00"));

        let (status, listing) = send(
            &app,
            "POST",
            "/api/estimates/1/overheads",
            Some(json!({"container_id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let link_id = listing["links"][0]["id"].as_i64().unwrap();

        let (_, after) = send(&app, "GET", "/api/estimates/1/totals", None).await;
        assert_eq!(after["grand"]["total"], json!("1460.00"));

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/estimates/1/overheads/{}/quantity", link_id),
            Some(json!({"quantity": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/estimates/1/overheads/{}", link_id);
        let (status, _) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, reset) = send(&app, "GET", "/api/estimates/1/totals", None).await;
        assert_eq!(reset["grand"]["total"], json!("1300.00"));
    }

    #[tokio::test]
    async fn test_vat_and_export() {
        let app = app();
        let active = Some(json!({"active": true}));
        let (status, vat) = send(&app, "POST", "/api/estimates/1/vat/toggle", active).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(vat["active"], json!(true));

        let request = Request::builder()
            .uri("/api/estimates/1/export.csv")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.lines().nth(1).unwrap().contains("1560.00"));
    }

    #[tokio::test]
    async fn test_oversized_vat_rate_is_rejected() {
        let app = app();
        for rate in ["1e2000000", "1e-2000000"] {
            let (status, body) = send(
                &app,
                "POST",
                "/api/estimates/1/vat/rate",
                Some(json!({ "rate": rate })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["code"], json!("INVALID_INPUT"));
            assert!(body["message"].as_str().unwrap().len() < 200);
        }
        let (_, vat) = send(&app, "GET", "/api/estimates/1/vat", None).await;
        assert_eq!(vat["rate_percent"], json!("20"));
    }

    #[tokio::test]
    async fn test_blocking_pricing_returns_engine_result() {
        let state = state();
        let total = handlers::blocking(&state, |engine| {
            engine.price_estimate(1, None).map(|p| p.totals.root().total.clone())
        })
        .await
        .unwrap();
        assert_eq!(total.unwrap(), dec("1300"));
    }

    #[tokio::test]
    async fn test_failed_pricing_task_maps_to_internal_error() {
        let response = handlers::blocking(&state(), |_| -> u8 { panic!("pricing aborted") })
            .await
            .unwrap_err();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], json!("INTERNAL_ERROR"));
        assert_eq!(body["success"], json!(false));
    }
}
