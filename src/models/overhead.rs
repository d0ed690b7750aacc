use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 间接费用容器 (НР): 材料/工作分摊百分比相互独立, 不要求相加为 100
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OverheadCostContainer {
    pub id: i64,
    pub name: String,
    pub materials_pct: BigDecimal,
    pub works_pct: BigDecimal,
    pub total: BigDecimal,
    pub is_active: bool,
}

/// 估算单与容器的绑定, 快照值在显式刷新前保持不变
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EstimateOverheadCostLink {
    pub id: i64,
    pub container_id: i64,
    pub is_active: bool,
    /// 倍数, >= 1
    pub quantity: i32,
    pub snapshot_total: BigDecimal,
    pub snapshot_materials_pct: BigDecimal,
    pub snapshot_works_pct: BigDecimal,
    pub order: i32,
    pub applied_at: DateTime<Utc>,
}

impl EstimateOverheadCostLink {
    /// 以容器当前值建立快照
    pub fn snapshot_of(id: i64, container: &OverheadCostContainer, order: i32) -> Self {
        Self {
            id,
            container_id: container.id,
            is_active: true,
            quantity: 1,
            snapshot_total: container.total.clone(),
            snapshot_materials_pct: container.materials_pct.clone(),
            snapshot_works_pct: container.works_pct.clone(),
            order,
            applied_at: Utc::now(),
        }
    }

    /// 重新捕获容器当前值
    pub fn refresh_from(&mut self, container: &OverheadCostContainer) {
        self.snapshot_total = container.total.clone();
        self.snapshot_materials_pct = container.materials_pct.clone();
        self.snapshot_works_pct = container.works_pct.clone();
        self.applied_at = Utc::now();
    }

    /// 容器当前值与快照不一致时返回漂移信息
    pub fn drift_against(&self, container: &OverheadCostContainer) -> Option<SnapshotDrift> {
        let changed = self.snapshot_total != container.total
            || self.snapshot_materials_pct != container.materials_pct
            || self.snapshot_works_pct != container.works_pct;

        changed.then(|| SnapshotDrift {
            link_id: self.id,
            container_id: container.id,
            snapshot_total: self.snapshot_total.clone(),
            live_total: container.total.clone(),
            snapshot_materials_pct: self.snapshot_materials_pct.clone(),
            live_materials_pct: container.materials_pct.clone(),
            snapshot_works_pct: self.snapshot_works_pct.clone(),
            live_works_pct: container.works_pct.clone(),
        })
    }
}

/// 配置漂移 (非致命): 快照仍然是计价依据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDrift {
    pub link_id: i64,
    pub container_id: i64,
    pub snapshot_total: BigDecimal,
    pub live_total: BigDecimal,
    pub snapshot_materials_pct: BigDecimal,
    pub live_materials_pct: BigDecimal,
    pub snapshot_works_pct: BigDecimal,
    pub live_works_pct: BigDecimal,
}

/// 有效的间接费分摊上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverheadContext {
    pub total_overhead_amount: BigDecimal,
    pub avg_materials_pct: BigDecimal,
    pub avg_works_pct: BigDecimal,
}

impl OverheadContext {
    /// 无有效链接时的零状态
    pub fn zero() -> Self {
        Self {
            total_overhead_amount: BigDecimal::zero(),
            avg_materials_pct: BigDecimal::zero(),
            avg_works_pct: BigDecimal::zero(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total_overhead_amount.is_zero()
            && self.avg_materials_pct.is_zero()
            && self.avg_works_pct.is_zero()
    }
}

impl Default for OverheadContext {
    fn default() -> Self {
        Self::zero()
    }
}

/// 带估算单 ID 的链接 (批量加载用)
#[derive(Debug, Clone, FromRow)]
pub struct OverheadLinkRecord {
    pub estimate_id: i64,
    #[sqlx(flatten)]
    pub link: EstimateOverheadCostLink,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn container() -> OverheadCostContainer {
        OverheadCostContainer {
            id: 5,
            name: "Общестроительные".to_string(),
            materials_pct: BigDecimal::from(10),
            works_pct: BigDecimal::from(20),
            total: BigDecimal::from_str("15000.00").unwrap(),
            is_active: true,
        }
    }

    #[test]
    fn test_fresh_snapshot_has_no_drift() {
        let c = container();
        let link = EstimateOverheadCostLink::snapshot_of(1, &c, 1);
        assert_eq!(link.quantity, 1);
        assert!(link.is_active);
        assert!(link.drift_against(&c).is_none());
    }

    #[test]
    fn test_container_edit_reports_drift_and_keeps_snapshot() {
        let mut c = container();
        let mut link = EstimateOverheadCostLink::snapshot_of(1, &c, 1);
        c.total = BigDecimal::from(18000);

        let drift = link.drift_against(&c).unwrap();
        assert_eq!(drift.snapshot_total, BigDecimal::from(15000));
        assert_eq!(drift.live_total, BigDecimal::from(18000));
        assert_eq!(link.snapshot_total, BigDecimal::from(15000));

        link.refresh_from(&c);
        assert!(link.drift_against(&c).is_none());
    }

    #[test]
    fn test_zero_context() {
        assert!(OverheadContext::zero().is_zero());
    }
}
