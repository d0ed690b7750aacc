use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    round_money, BatchOutcome, EstimateRow, LineResult, NodeTotals, RowError, RowMapping,
};
use crate::service::batch::BatchItem;
use crate::service::section_tree::{SectionTree, TreeTotals, ROOT};
use crate::service::{
    BatchCalculator, CardPricer, EstimateAdminService, LineCalculator, OverheadContextResolver,
    PricingContext,
};
use crate::store::EstimateStore;
use bigdecimal::{BigDecimal, Zero};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// 一行的计价状态
#[derive(Debug, Clone, Serialize)]
pub struct PricedRow {
    pub row: EstimateRow,
    pub mapping: Option<RowMapping>,
    pub result: Option<LineResult>,
    pub error: Option<RowError>,
}

/// 章节合计视图 (已取整)
#[derive(Debug, Clone, Serialize)]
pub struct SectionTotalView {
    pub path: String,
    pub name: String,
    pub depth: usize,
    pub material: BigDecimal,
    pub work: BigDecimal,
    pub total: BigDecimal,
    pub rows: usize,
}

impl SectionTotalView {
    fn new(tree: &SectionTree, id: usize, totals: &NodeTotals) -> Self {
        let node = tree.node(id);
        Self {
            path: node.map(|n| n.path.clone()).unwrap_or_default(),
            name: node.map(|n| n.name.clone()).unwrap_or_default(),
            depth: depth_of(tree, id),
            material: round_money(&totals.material),
            work: round_money(&totals.work),
            total: round_money(&totals.total),
            rows: totals.rows,
        }
    }
}

fn depth_of(tree: &SectionTree, id: usize) -> usize {
    let mut depth = 0;
    let mut current = tree.node(id).and_then(|n| n.parent);
    while let Some(parent) = current {
        depth += 1;
        current = tree.node(parent).and_then(|n| n.parent);
    }
    depth
}

/// 整张估算单的计价结果
#[derive(Debug, Clone)]
pub struct PricedEstimate {
    pub estimate_id: i64,
    pub revision: u64,
    pub pricing: PricingContext,
    pub rows: Vec<PricedRow>,
    pub tree: SectionTree,
    pub totals: TreeTotals,
}

impl PricedEstimate {
    /// 有贡献行的节点, 树序输出, 根节点在前
    pub fn section_totals(&self) -> Vec<SectionTotalView> {
        self.totals
            .iter()
            .map(|(id, t)| SectionTotalView::new(&self.tree, id, t))
            .collect()
    }

    pub fn grand_total(&self) -> SectionTotalView {
        SectionTotalView::new(&self.tree, ROOT, self.totals.root())
    }

    pub fn errors(&self) -> impl Iterator<Item = &RowError> {
        self.rows.iter().filter_map(|r| r.error.as_ref())
    }
}

/// 最贵的行
#[derive(Debug, Clone, Serialize)]
pub struct TopPosition {
    pub row_index: i64,
    pub name: String,
    pub card_id: i64,
    pub quantity: BigDecimal,
    pub total_price: BigDecimal,
}

/// 估算单分析
#[derive(Debug, Clone, Serialize)]
pub struct EstimateAnalysis {
    pub estimate_id: i64,
    pub priced_rows: usize,
    pub failed_rows: usize,
    /// Σ 未加价成本 × 数量
    pub base_cost: BigDecimal,
    /// 卡片加价后, 未计间接费
    pub sale_without_overhead: BigDecimal,
    /// 计入间接费, 未计增值税
    pub with_overhead: BigDecimal,
    pub with_vat: BigDecimal,
    pub overhead_total: BigDecimal,
    pub sections: Vec<SectionTotalView>,
    pub top_positions: Vec<TopPosition>,
}

/// 计价引擎: 组装内存库、上下文解析、单行与批量计算、写路径
pub struct EstimateEngine {
    store: Arc<EstimateStore>,
    resolver: Arc<OverheadContextResolver>,
    pricer: Arc<CardPricer>,
    batch: BatchCalculator,
    admin: EstimateAdminService,
}

impl EstimateEngine {
    pub fn new(store: Arc<EstimateStore>, pool: Option<PgPool>, config: &EngineConfig) -> Self {
        let resolver = Arc::new(OverheadContextResolver::new(store.clone()));
        let pricer = Arc::new(CardPricer::new(store.clone()));
        let lines = Arc::new(LineCalculator::new(pricer.clone()));
        let batch = BatchCalculator::new(resolver.clone(), lines, config.parallel_batch_threshold);
        let admin = EstimateAdminService::new(store.clone(), resolver.clone(), pool);

        Self {
            store,
            resolver,
            pricer,
            batch,
            admin,
        }
    }

    pub fn store(&self) -> &Arc<EstimateStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<OverheadContextResolver> {
        &self.resolver
    }

    pub fn batch(&self) -> &BatchCalculator {
        &self.batch
    }

    pub fn admin(&self) -> &EstimateAdminService {
        &self.admin
    }

    /// 在同一个读锁下复制行与映射并取得计价上下文, 三者属于同一 revision
    fn consistent_snapshot(
        &self,
        estimate_id: i64,
    ) -> EngineResult<(Vec<EstimateRow>, Vec<RowMapping>, PricingContext)> {
        let estimate = self
            .store
            .estimate(estimate_id)
            .ok_or_else(|| EngineError::not_found("estimate", estimate_id))?;
        let pricing = self.resolver.pricing_for(&estimate);
        Ok((estimate.rows.clone(), estimate.mappings.clone(), pricing))
    }

    /// 计算整张估算单并按章节汇总
    ///
    /// `visible` 为 None 时全部行参与汇总。
    pub fn price_estimate(
        &self,
        estimate_id: i64,
        visible: Option<&HashSet<i64>>,
    ) -> EngineResult<PricedEstimate> {
        let start = Instant::now();
        let (rows, mappings, pricing) = self.consistent_snapshot(estimate_id)?;

        let items: Vec<BatchItem> = mappings
            .iter()
            .map(|m| BatchItem {
                row_index: m.row_index,
                card_id: m.card_id,
                quantity: m.quantity.clone(),
            })
            .collect();
        let BatchOutcome { results, errors } = self.batch.calculate_with(&pricing, &items)?;

        let mut by_row: HashMap<i64, LineResult> = results
            .into_iter()
            .map(|r| (r.row_index, r.result))
            .collect();
        let mut errors_by_row: HashMap<i64, RowError> =
            errors.into_iter().map(|e| (e.row_index, e)).collect();
        let mut mappings_by_row: HashMap<i64, RowMapping> =
            mappings.into_iter().map(|m| (m.row_index, m)).collect();

        let tree = SectionTree::from_rows(&rows);
        let totals = tree.aggregate(&by_row, visible);

        let priced_rows = rows
            .into_iter()
            .map(|row| PricedRow {
                mapping: mappings_by_row.remove(&row.row_index),
                result: by_row.remove(&row.row_index),
                error: errors_by_row.remove(&row.row_index),
                row,
            })
            .collect::<Vec<_>>();

        tracing::info!(
            "Estimate {} priced: {} rows, {} sections, total {}, {:?}",
            estimate_id,
            priced_rows.len(),
            tree.node_count() - 1,
            round_money(&totals.root().total),
            start.elapsed()
        );

        Ok(PricedEstimate {
            estimate_id,
            revision: pricing.revision,
            pricing,
            rows: priced_rows,
            tree,
            totals,
        })
    }

    pub fn analyse_estimate(
        &self,
        estimate_id: i64,
        top_n: usize,
    ) -> EngineResult<EstimateAnalysis> {
        let priced = self.price_estimate(estimate_id, None)?;

        let mut base_cost = BigDecimal::zero();
        let mut sale_without_overhead = BigDecimal::zero();
        let mut with_overhead = BigDecimal::zero();
        let mut with_vat = BigDecimal::zero();
        let mut positions = Vec::new();

        for row in &priced.rows {
            let (Some(mapping), Some(result)) = (&row.mapping, &row.result) else {
                continue;
            };
            match self.pricer.price_card(mapping.card_id, &mapping.quantity) {
                Ok(base) => {
                    let unit_cost = &base.base_unit_material + &base.base_unit_work;
                    base_cost += unit_cost * &mapping.quantity;
                    sale_without_overhead += &base.total_material_price + &base.total_work_price;
                }
                Err(e) => tracing::warn!(
                    "Estimate {} row {}: base cost unavailable: {}",
                    estimate_id, row.row.row_index, e
                ),
            }
            with_overhead += &result.total_price_without_vat;
            with_vat += &result.total_price;
            positions.push(TopPosition {
                row_index: row.row.row_index,
                name: row.row.name.clone(),
                card_id: mapping.card_id,
                quantity: mapping.quantity.clone(),
                total_price: result.total_price.clone(),
            });
        }

        positions.sort_by(|a, b| {
            b.total_price
                .cmp(&a.total_price)
                .then(a.row_index.cmp(&b.row_index))
        });
        positions.truncate(top_n);
        for p in &mut positions {
            p.total_price = round_money(&p.total_price);
        }

        let mut sections: Vec<SectionTotalView> = priced
            .tree
            .root()
            .children
            .iter()
            .filter_map(|&id| {
                priced
                    .totals
                    .get(id)
                    .map(|t| SectionTotalView::new(&priced.tree, id, t))
            })
            .collect();
        sections.sort_by(|a, b| b.total.cmp(&a.total));

        let failed_rows = priced.errors().count();
        let priced_rows = priced.rows.iter().filter(|r| r.result.is_some()).count();

        Ok(EstimateAnalysis {
            estimate_id,
            priced_rows,
            failed_rows,
            base_cost: round_money(&base_cost),
            sale_without_overhead: round_money(&sale_without_overhead),
            with_overhead: round_money(&with_overhead),
            with_vat: round_money(&with_vat),
            overhead_total: round_money(&priced.pricing.overhead.total_overhead_amount),
            sections,
            top_positions: positions,
        })
    }
}
