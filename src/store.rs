use crate::models::{Estimate, OverheadCostContainer, TechnicalCard};
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// 内存库: 计价引擎只读取已加载的数据
///
/// 估算单的修改必须经过 `estimate_mut` 并调用 `Estimate::touch`,
/// 上下文缓存依赖 revision 判定是否过期。
#[derive(Debug, Default)]
pub struct EstimateStore {
    cards: DashMap<i64, TechnicalCard>,
    containers: DashMap<i64, OverheadCostContainer>,
    estimates: DashMap<i64, Estimate>,
    last_link_id: AtomicI64,
}

impl EstimateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_card(&self, card: TechnicalCard) {
        self.cards.insert(card.id, card);
    }

    pub fn card(&self, card_id: i64) -> Option<Ref<'_, i64, TechnicalCard>> {
        self.cards.get(&card_id)
    }

    pub fn insert_container(&self, container: OverheadCostContainer) {
        self.containers.insert(container.id, container);
    }

    pub fn container(&self, container_id: i64) -> Option<Ref<'_, i64, OverheadCostContainer>> {
        self.containers.get(&container_id)
    }

    pub fn container_mut(
        &self,
        container_id: i64,
    ) -> Option<RefMut<'_, i64, OverheadCostContainer>> {
        self.containers.get_mut(&container_id)
    }

    /// 已启用的容器, 按名称排序
    pub fn active_containers(&self) -> Vec<OverheadCostContainer> {
        let mut list: Vec<_> = self
            .containers
            .iter()
            .filter(|c| c.is_active)
            .map(|c| c.value().clone())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        list
    }

    pub fn insert_estimate(&self, estimate: Estimate) {
        let max_link = estimate.overhead_links.iter().map(|l| l.id).max().unwrap_or(0);
        self.last_link_id.fetch_max(max_link, Ordering::SeqCst);
        self.estimates.insert(estimate.id, estimate);
    }

    pub fn estimate(&self, estimate_id: i64) -> Option<Ref<'_, i64, Estimate>> {
        self.estimates.get(&estimate_id)
    }

    pub fn estimate_mut(&self, estimate_id: i64) -> Option<RefMut<'_, i64, Estimate>> {
        self.estimates.get_mut(&estimate_id)
    }

    /// 引用了某容器的估算单 ID
    pub fn estimates_linking(&self, container_id: i64) -> Vec<i64> {
        self.estimates
            .iter()
            .filter(|e| e.overhead_links.iter().any(|l| l.container_id == container_id))
            .map(|e| e.id)
            .collect()
    }

    pub fn next_link_id(&self) -> i64 {
        self.last_link_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn card_count(&self) -> usize {
        self.cards.len()
    }

    pub fn estimate_count(&self) -> usize {
        self.estimates.len()
    }
}
