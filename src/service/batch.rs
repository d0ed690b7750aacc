use crate::error::{EngineError, EngineResult};
use crate::models::{BatchOutcome, LineResult, RowError, RowResult};
use crate::service::card_pricer::parse_quantity_value;
use crate::service::{LineCalculator, OverheadContextResolver, PricingContext};
use bigdecimal::BigDecimal;
use rayon::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

/// 已解析的批量条目
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub row_index: i64,
    pub card_id: i64,
    pub quantity: BigDecimal,
}

/// 接口层原始条目, 数量可为 "12,5" 或数字
#[derive(Debug, Clone, Deserialize)]
pub struct RawBatchItem {
    pub row_index: i64,
    pub card_id: i64,
    pub quantity: serde_json::Value,
}

fn row_error(row_index: i64, err: &EngineError) -> RowError {
    RowError {
        row_index,
        code: err.error_code(),
        error: err.to_string(),
    }
}

/// 解析原始条目, 格式错误的数量直接记为行错误
pub fn split_raw_items(raw: Vec<RawBatchItem>) -> (Vec<BatchItem>, Vec<RowError>) {
    let mut items = Vec::with_capacity(raw.len());
    let mut errors = Vec::new();

    for r in raw {
        match parse_quantity_value(&r.quantity) {
            Ok(quantity) => items.push(BatchItem {
                row_index: r.row_index,
                card_id: r.card_id,
                quantity,
            }),
            Err(e) => errors.push(row_error(r.row_index, &e)),
        }
    }

    (items, errors)
}

/// 行级错误记入结果, 其余错误中断整个批量
fn row_outcome(
    estimate_id: i64,
    item: &BatchItem,
    result: EngineResult<LineResult>,
) -> EngineResult<Result<RowResult, RowError>> {
    match result {
        Ok(result) => Ok(Ok(RowResult {
            row_index: item.row_index,
            card_id: item.card_id,
            quantity: item.quantity.clone(),
            result,
        })),
        Err(e) if e.is_row_level() => {
            tracing::warn!(
                "Estimate {} row {}: card {} calc failed: {}",
                estimate_id, item.row_index, item.card_id, e
            );
            Ok(Err(row_error(item.row_index, &e)))
        }
        Err(e) => Err(e),
    }
}

/// 批量计算协调器: 每次调用只解析一次上下文
pub struct BatchCalculator {
    resolver: Arc<OverheadContextResolver>,
    lines: Arc<LineCalculator>,
    parallel_threshold: usize,
}

impl BatchCalculator {
    pub fn new(
        resolver: Arc<OverheadContextResolver>,
        lines: Arc<LineCalculator>,
        parallel_threshold: usize,
    ) -> Self {
        Self {
            resolver,
            lines,
            parallel_threshold: parallel_threshold.max(1),
        }
    }

    /// 单行计算, 与批量路径共用同一上下文解析
    pub fn calculate_single(
        &self,
        estimate_id: i64,
        card_id: i64,
        quantity: &BigDecimal,
    ) -> EngineResult<LineResult> {
        let pricing = self.resolver.resolve_pricing(estimate_id)?;
        self.lines
            .calculate_line(card_id, quantity, &pricing.overhead, &pricing.vat)
    }

    /// 估算单不存在时整体失败; 单行失败只记录行错误
    pub fn calculate_batch(
        &self,
        estimate_id: i64,
        items: &[BatchItem],
    ) -> EngineResult<BatchOutcome> {
        let start = Instant::now();
        let pricing = self.resolver.resolve_pricing(estimate_id)?;
        let outcome = self.calculate_with(&pricing, items)?;

        tracing::info!(
            "Batch calc estimate {}: {} items, {} ok, {} failed, {:?}",
            estimate_id,
            items.len(),
            outcome.results.len(),
            outcome.errors.len(),
            start.elapsed()
        );

        Ok(outcome)
    }

    /// 使用给定上下文计算, 不再访问缓存
    pub fn calculate_with(
        &self,
        pricing: &PricingContext,
        items: &[BatchItem],
    ) -> EngineResult<BatchOutcome> {
        let compute = |item: &BatchItem| {
            let result = self.lines.calculate_line(
                item.card_id,
                &item.quantity,
                &pricing.overhead,
                &pricing.vat,
            );
            row_outcome(pricing.estimate_id, item, result)
        };

        let computed: Vec<Result<RowResult, RowError>> = if items.len() >= self.parallel_threshold {
            items.par_iter().map(compute).collect::<EngineResult<_>>()?
        } else {
            items.iter().map(compute).collect::<EngineResult<_>>()?
        };

        let mut outcome = BatchOutcome::default();
        for entry in computed {
            match entry {
                Ok(r) => outcome.results.push(r),
                Err(e) => outcome.errors.push(e),
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CardMarkups, Estimate, EstimateOverheadCostLink, OverheadCostContainer, ResourceLine,
        TechnicalCard, TechnicalCardVersion, VatConfig,
    };
    use crate::service::CardPricer;
    use crate::store::EstimateStore;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn card(id: i64, mat_price: &str, work_price: &str) -> TechnicalCard {
        TechnicalCard {
            id,
            name: format!("ТК-{}", id),
            unit: "м2".to_string(),
            markups: CardMarkups::default(),
            versions: vec![TechnicalCardVersion {
                id: id * 10,
                version: 1,
                is_published: true,
                materials: vec![ResourceLine::new(dec("2"), dec(mat_price))],
                works: vec![ResourceLine::new(dec("1"), dec(work_price))],
            }],
        }
    }

    fn calculator(threshold: usize) -> BatchCalculator {
        let store = Arc::new(EstimateStore::new());
        store.insert_card(card(1, "50.00", "30.00"));
        store.insert_card(card(3, "12.35", "7.10"));

        let container = OverheadCostContainer {
            id: 1,
            name: "НР".to_string(),
            materials_pct: dec("10"),
            works_pct: dec("20"),
            total: dec("5000"),
            is_active: true,
        };
        let mut estimate = Estimate::new(1, "Смета", VatConfig::active(dec("20")));
        estimate
            .overhead_links
            .push(EstimateOverheadCostLink::snapshot_of(1, &container, 1));
        store.insert_container(container);
        store.insert_estimate(estimate);

        let resolver = Arc::new(OverheadContextResolver::new(store.clone()));
        let lines = Arc::new(LineCalculator::new(Arc::new(CardPricer::new(store))));
        BatchCalculator::new(resolver, lines, threshold)
    }

    fn items() -> Vec<BatchItem> {
        vec![
            BatchItem { row_index: 1, card_id: 1, quantity: dec("10") },
            BatchItem { row_index: 2, card_id: 404, quantity: dec("1") },
            BatchItem { row_index: 3, card_id: 3, quantity: dec("2.5") },
        ]
    }

    #[test]
    fn test_partial_success_keeps_siblings() {
        let calc = calculator(1000);
        let outcome = calc.calculate_batch(1, &items()).unwrap();

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row_index, 2);
        assert_eq!(outcome.errors[0].code, "NOT_FOUND");

        let first = outcome.results.iter().find(|r| r.row_index == 1).unwrap();
        assert_eq!(first.result.total_price, dec("1752.00"));
    }

    #[test]
    fn test_batch_matches_single_row() {
        let calc = calculator(1000);
        let outcome = calc.calculate_batch(1, &items()).unwrap();
        for row in &outcome.results {
            let single = calc.calculate_single(1, row.card_id, &row.quantity).unwrap();
            assert_eq!(single, row.result);
        }
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let sequential = calculator(1000).calculate_batch(1, &items()).unwrap();
        let parallel = calculator(1).calculate_batch(1, &items()).unwrap();

        assert_eq!(sequential.errors.len(), parallel.errors.len());
        for row in &sequential.results {
            let other = parallel
                .results
                .iter()
                .find(|r| r.row_index == row.row_index)
                .unwrap();
            assert_eq!(other.result, row.result);
        }
    }

    #[test]
    fn test_unknown_estimate_fails_whole_batch() {
        let err = calculator(1000).calculate_batch(77, &items()).unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_only_row_level_errors_are_isolated() {
        let item = BatchItem { row_index: 4, card_id: 1, quantity: dec("1") };

        let missing = Err(EngineError::not_found("technical card", 1));
        let row = row_outcome(1, &item, missing).unwrap().unwrap_err();
        assert_eq!(row.row_index, 4);
        assert_eq!(row.code, "NOT_FOUND");

        let storage = Err(EngineError::Database(sqlx::Error::PoolTimedOut));
        let err = row_outcome(1, &item, storage).unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_split_raw_items_reports_malformed_quantity() {
        let raw: Vec<RawBatchItem> = serde_json::from_value(serde_json::json!([
            {"row_index": 1, "card_id": 1, "quantity": "10,5"},
            {"row_index": 2, "card_id": 1, "quantity": "десять"},
            {"row_index": 3, "card_id": 1, "quantity": 0}
        ]))
        .unwrap();

        let (items, errors) = split_raw_items(raw);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, dec("10.5"));
        let failed: Vec<_> = errors.iter().map(|e| e.row_index).collect();
        assert_eq!(failed, vec![2, 3]);
        assert!(errors.iter().all(|e| e.code == "INVALID_INPUT"));
    }
}
