use crate::error::{EngineError, EngineResult};
use crate::models::{Estimate, EstimateOverheadCostLink, OverheadContext, VatConfig};
use crate::store::EstimateStore;
use bigdecimal::{BigDecimal, Zero};
use dashmap::DashMap;
use std::sync::Arc;

/// 由有效链接计算分摊上下文
///
/// 总额 = Σ(快照总额 × 倍数); 材料/工作百分比按倍数加权平均。
/// 倍数同时作为百分比的权重, 与现有产品行为一致 (见 DESIGN.md)。
pub fn compute_context(links: &[EstimateOverheadCostLink]) -> OverheadContext {
    let mut total_amount = BigDecimal::zero();
    let mut weight_sum = BigDecimal::zero();
    let mut weighted_mat = BigDecimal::zero();
    let mut weighted_work = BigDecimal::zero();

    for link in links.iter().filter(|l| l.is_active && l.quantity > 0) {
        let weight = BigDecimal::from(link.quantity);
        total_amount += &link.snapshot_total * &weight;
        weighted_mat += &link.snapshot_materials_pct * &weight;
        weighted_work += &link.snapshot_works_pct * &weight;
        weight_sum += weight;
    }

    if weight_sum.is_zero() {
        return OverheadContext::zero();
    }

    OverheadContext {
        total_overhead_amount: total_amount,
        avg_materials_pct: weighted_mat / &weight_sum,
        avg_works_pct: weighted_work / &weight_sum,
    }
}

/// 一次计价所需的估算单级输入
#[derive(Debug, Clone, PartialEq)]
pub struct PricingContext {
    pub estimate_id: i64,
    pub revision: u64,
    pub overhead: OverheadContext,
    pub vat: VatConfig,
}

#[derive(Debug, Clone)]
struct CachedContext {
    revision: u64,
    context: OverheadContext,
}

/// 间接费上下文解析器: 读穿透缓存 + 写侧失效
///
/// 缓存项带有估算单 revision, revision 不一致视为未命中,
/// 因此即使调用方漏掉 `invalidate` 也不会读到旧值。
pub struct OverheadContextResolver {
    store: Arc<EstimateStore>,
    cache: DashMap<i64, CachedContext>,
}

impl OverheadContextResolver {
    pub fn new(store: Arc<EstimateStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    pub fn resolve(&self, estimate_id: i64) -> EngineResult<OverheadContext> {
        Ok(self.resolve_pricing(estimate_id)?.overhead)
    }

    /// 同一读锁下取得间接费上下文与增值税配置
    pub fn resolve_pricing(&self, estimate_id: i64) -> EngineResult<PricingContext> {
        // 持有估算单读锁直到写入缓存, 修改方拿不到写锁
        let estimate = self
            .store
            .estimate(estimate_id)
            .ok_or_else(|| EngineError::not_found("estimate", estimate_id))?;
        Ok(self.pricing_for(&estimate))
    }

    /// 由调用方持有的估算单计算计价上下文
    ///
    /// 调用方在同一个读锁下还可以复制行与映射, 三者属于同一 revision。
    pub fn pricing_for(&self, estimate: &Estimate) -> PricingContext {
        PricingContext {
            estimate_id: estimate.id,
            revision: estimate.revision,
            overhead: self.context_for(estimate),
            vat: estimate.vat.clone(),
        }
    }

    fn context_for(&self, estimate: &Estimate) -> OverheadContext {
        if let Some(hit) = self.cache.get(&estimate.id) {
            if hit.revision == estimate.revision {
                tracing::debug!("Overhead context cache hit: estimate {}", estimate.id);
                return hit.context.clone();
            }
        }

        let context = compute_context(&estimate.overhead_links);

        for link in estimate.overhead_links.iter().filter(|l| l.is_active) {
            if let Some(container) = self.store.container(link.container_id) {
                if let Some(drift) = link.drift_against(&container) {
                    tracing::warn!(
                        "Estimate {} link {}: container {} drifted (snapshot {}, live {}), kept",
                        estimate.id,
                        drift.link_id,
                        drift.container_id,
                        drift.snapshot_total,
                        drift.live_total
                    );
                }
            }
        }

        tracing::debug!(
            "Overhead context resolved: estimate {} rev {}, amount {}, mat {}%, work {}%",
            estimate.id,
            estimate.revision,
            context.total_overhead_amount,
            context.avg_materials_pct,
            context.avg_works_pct
        );

        self.cache.insert(
            estimate.id,
            CachedContext {
                revision: estimate.revision,
                context: context.clone(),
            },
        );

        context
    }

    /// 写路径必须在同一步骤内调用
    pub fn invalidate(&self, estimate_id: i64) {
        if self.cache.remove(&estimate_id).is_some() {
            tracing::debug!("Overhead context invalidated: estimate {}", estimate_id);
        }
    }

    pub fn is_cached(&self, estimate_id: i64) -> bool {
        self.cache.contains_key(&estimate_id)
    }
}
