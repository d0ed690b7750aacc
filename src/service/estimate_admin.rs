use crate::db::queries;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Estimate, EstimateOverheadCostLink, OverheadCostContainer, RowMapping, SnapshotDrift,
    VatConfig,
};
use crate::service::card_pricer::{ensure_bounded, ensure_valid_quantity};
use crate::service::overhead_context::compute_context;
use crate::service::OverheadContextResolver;
use crate::store::EstimateStore;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 间接费列表中的一行
#[derive(Debug, Clone, Serialize)]
pub struct OverheadLinkView {
    pub id: i64,
    pub container_id: i64,
    pub name: String,
    pub snapshot_total: BigDecimal,
    /// 容器当前总额 × 倍数
    pub current_total: BigDecimal,
    pub materials_pct: BigDecimal,
    pub works_pct: BigDecimal,
    pub quantity: i32,
    pub is_active: bool,
    pub order: i32,
    pub applied_at: DateTime<Utc>,
    pub has_changes: bool,
}

/// 估算单间接费总览
#[derive(Debug, Clone, Serialize)]
pub struct OverheadListing {
    pub links: Vec<OverheadLinkView>,
    pub containers: Vec<OverheadCostContainer>,
    pub overhead_total: BigDecimal,
    pub avg_materials_pct: BigDecimal,
    pub avg_works_pct: BigDecimal,
    pub drift: Vec<SnapshotDrift>,
}

/// 容器修改 (仅覆盖给出的字段)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerUpdate {
    pub name: Option<String>,
    pub materials_pct: Option<BigDecimal>,
    pub works_pct: Option<BigDecimal>,
    pub total: Option<BigDecimal>,
    pub is_active: Option<bool>,
}

type WriteLocks = DashMap<i64, Arc<Mutex<()>>>;

/// 估算单写路径: 链接 / 增值税 / 行映射 / 容器
///
/// 同一估算单 (或容器) 的写操作由异步锁串行化。链接与增值税的字段修改
/// 在估算单写锁内作用于当前值, 随后落库已修改的值; 落库失败时恢复原值。
/// 每次内存修改都会 bump revision 并使该估算单的上下文缓存失效。
pub struct EstimateAdminService {
    store: Arc<EstimateStore>,
    resolver: Arc<OverheadContextResolver>,
    pool: Option<PgPool>,
    estimate_locks: WriteLocks,
    container_locks: WriteLocks,
}

impl EstimateAdminService {
    pub fn new(
        store: Arc<EstimateStore>,
        resolver: Arc<OverheadContextResolver>,
        pool: Option<PgPool>,
    ) -> Self {
        Self {
            store,
            resolver,
            pool,
            estimate_locks: DashMap::new(),
            container_locks: DashMap::new(),
        }
    }

    /// 估算单写锁; 不存在的估算单不建锁
    async fn lock_estimate(&self, estimate_id: i64) -> EngineResult<OwnedMutexGuard<()>> {
        if self.store.estimate(estimate_id).is_none() {
            return Err(EngineError::not_found("estimate", estimate_id));
        }
        let lock = self.estimate_locks.entry(estimate_id).or_default().value().clone();
        Ok(lock.lock_owned().await)
    }

    async fn lock_container(&self, container_id: i64) -> EngineResult<OwnedMutexGuard<()>> {
        if self.store.container(container_id).is_none() {
            return Err(EngineError::not_found("overhead container", container_id));
        }
        let lock = self.container_locks.entry(container_id).or_default().value().clone();
        Ok(lock.lock_owned().await)
    }

    fn read<R>(
        &self,
        estimate_id: i64,
        f: impl FnOnce(&Estimate) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let estimate = self
            .store
            .estimate(estimate_id)
            .ok_or_else(|| EngineError::not_found("estimate", estimate_id))?;
        f(&estimate)
    }

    fn mutate<R>(
        &self,
        estimate_id: i64,
        f: impl FnOnce(&mut Estimate) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let result = {
            let mut estimate = self
                .store
                .estimate_mut(estimate_id)
                .ok_or_else(|| EngineError::not_found("estimate", estimate_id))?;
            let r = f(&mut estimate)?;
            estimate.touch();
            r
        };
        self.resolver.invalidate(estimate_id);
        Ok(result)
    }

    /// 落库失败后恢复内存状态, 恢复本身失败只记日志
    fn rollback(&self, estimate_id: i64, what: &str, undo: impl FnOnce(&mut Estimate)) {
        tracing::warn!("Estimate {}: persisting {} failed, reverting", estimate_id, what);
        if let Err(err) = self.mutate(estimate_id, |e| {
            undo(e);
            Ok(())
        }) {
            tracing::error!("Estimate {}: revert of {} failed: {}", estimate_id, what, err);
        }
    }

    fn container_snapshot(&self, container_id: i64) -> EngineResult<OverheadCostContainer> {
        self.store
            .container(container_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| EngineError::not_found("overhead container", container_id))
    }

    /// 在写锁内修改当前链接, 再落库修改后的值
    async fn edit_link(
        &self,
        estimate_id: i64,
        link_id: i64,
        edit: impl FnOnce(&mut EstimateOverheadCostLink),
    ) -> EngineResult<OverheadListing> {
        let (before, after) = self.mutate(estimate_id, |e| {
            let link = e
                .link_mut(link_id)
                .ok_or_else(|| EngineError::not_found("overhead link", link_id))?;
            let before = link.clone();
            edit(&mut *link);
            Ok((before, link.clone()))
        })?;

        if let Some(pool) = &self.pool {
            if let Err(err) = queries::update_overhead_link(pool, estimate_id, &after).await {
                self.rollback(estimate_id, "overhead link", |e| {
                    if let Some(slot) = e.link_mut(link_id) {
                        *slot = before;
                    }
                });
                return Err(err.into());
            }
        }
        self.list_overheads(estimate_id)
    }

    /// 在写锁内修改增值税配置, 再落库修改后的值
    async fn edit_vat(
        &self,
        estimate_id: i64,
        edit: impl FnOnce(&mut VatConfig),
    ) -> EngineResult<VatConfig> {
        let (before, after) = self.mutate(estimate_id, |e| {
            let before = e.vat.clone();
            edit(&mut e.vat);
            Ok((before, e.vat.clone()))
        })?;

        if let Some(pool) = &self.pool {
            let saved =
                queries::update_vat(pool, estimate_id, after.active, &after.rate_percent).await;
            if let Err(err) = saved {
                self.rollback(estimate_id, "VAT", |e| e.vat = before);
                return Err(err.into());
            }
        }
        tracing::info!(
            "Estimate {}: VAT active = {}, rate = {}%",
            estimate_id, after.active, after.rate_percent
        );
        Ok(after)
    }

    pub fn list_overheads(&self, estimate_id: i64) -> EngineResult<OverheadListing> {
        let links = self.read(estimate_id, |e| Ok(e.overhead_links.clone()))?;

        let mut views = Vec::with_capacity(links.len());
        let mut drift = Vec::new();
        for link in &links {
            let container = self.store.container(link.container_id).map(|c| c.value().clone());
            let link_drift = container.as_ref().and_then(|c| link.drift_against(c));
            let current_total = container
                .as_ref()
                .map(|c| &c.total * BigDecimal::from(link.quantity))
                .unwrap_or_else(BigDecimal::zero);

            views.push(OverheadLinkView {
                id: link.id,
                container_id: link.container_id,
                name: container.map(|c| c.name).unwrap_or_default(),
                snapshot_total: &link.snapshot_total * BigDecimal::from(link.quantity),
                current_total,
                materials_pct: link.snapshot_materials_pct.clone(),
                works_pct: link.snapshot_works_pct.clone(),
                quantity: link.quantity,
                is_active: link.is_active,
                order: link.order,
                applied_at: link.applied_at,
                has_changes: link_drift.is_some(),
            });
            drift.extend(link_drift);
        }

        let context = compute_context(&links);
        Ok(OverheadListing {
            links: views,
            containers: self.store.active_containers(),
            overhead_total: context.total_overhead_amount,
            avg_materials_pct: context.avg_materials_pct,
            avg_works_pct: context.avg_works_pct,
            drift,
        })
    }

    pub async fn apply_overhead(
        &self,
        estimate_id: i64,
        container_id: i64,
    ) -> EngineResult<OverheadListing> {
        let _guard = self.lock_estimate(estimate_id).await?;
        let container = self.container_snapshot(container_id)?;
        let next_order = self.read(estimate_id, |e| {
            Ok(e.overhead_links.iter().map(|l| l.order).max().unwrap_or(0) + 1)
        })?;

        let link_id = self.store.next_link_id();
        let link = EstimateOverheadCostLink::snapshot_of(link_id, &container, next_order);
        if let Some(pool) = &self.pool {
            queries::insert_overhead_link(pool, estimate_id, &link).await?;
        }

        tracing::info!(
            "Estimate {}: overhead container {} applied as link {}",
            estimate_id, container_id, link.id
        );
        self.mutate(estimate_id, |e| {
            e.overhead_links.push(link);
            Ok(())
        })?;
        self.list_overheads(estimate_id)
    }

    pub async fn toggle_overhead(
        &self,
        estimate_id: i64,
        link_id: i64,
        is_active: bool,
    ) -> EngineResult<OverheadListing> {
        let _guard = self.lock_estimate(estimate_id).await?;
        let listing = self
            .edit_link(estimate_id, link_id, |link| link.is_active = is_active)
            .await?;
        tracing::info!("Estimate {}: link {} active = {}", estimate_id, link_id, is_active);
        Ok(listing)
    }

    pub async fn set_overhead_quantity(
        &self,
        estimate_id: i64,
        link_id: i64,
        quantity: i32,
    ) -> EngineResult<OverheadListing> {
        if quantity < 1 {
            return Err(EngineError::invalid_input(
                "quantity",
                quantity.to_string(),
                "overhead multiplier must be at least 1",
            ));
        }
        let _guard = self.lock_estimate(estimate_id).await?;
        let listing = self
            .edit_link(estimate_id, link_id, |link| link.quantity = quantity)
            .await?;
        tracing::info!("Estimate {}: link {} quantity = {}", estimate_id, link_id, quantity);
        Ok(listing)
    }

    /// 显式刷新快照, 清除漂移
    pub async fn refresh_snapshot(
        &self,
        estimate_id: i64,
        link_id: i64,
    ) -> EngineResult<OverheadListing> {
        let _guard = self.lock_estimate(estimate_id).await?;
        let container_id = self.read(estimate_id, |e| {
            e.link(link_id)
                .map(|l| l.container_id)
                .ok_or_else(|| EngineError::not_found("overhead link", link_id))
        })?;
        let container = self.container_snapshot(container_id)?;
        let listing = self
            .edit_link(estimate_id, link_id, |link| link.refresh_from(&container))
            .await?;
        tracing::info!(
            "Estimate {}: link {} snapshot refreshed from container {}",
            estimate_id, link_id, container.id
        );
        Ok(listing)
    }

    pub async fn delete_overhead(
        &self,
        estimate_id: i64,
        link_id: i64,
    ) -> EngineResult<OverheadListing> {
        let _guard = self.lock_estimate(estimate_id).await?;
        self.read(estimate_id, |e| {
            e.link(link_id)
                .map(|_| ())
                .ok_or_else(|| EngineError::not_found("overhead link", link_id))
        })?;
        if let Some(pool) = &self.pool {
            queries::delete_overhead_link(pool, estimate_id, link_id).await?;
        }
        tracing::info!("Estimate {}: link {} deleted", estimate_id, link_id);
        self.mutate(estimate_id, |e| {
            e.overhead_links.retain(|l| l.id != link_id);
            Ok(())
        })?;
        self.list_overheads(estimate_id)
    }

    /// 修改容器定义; 引用它的估算单全部失效, 快照保持不变
    pub async fn update_container(
        &self,
        container_id: i64,
        update: ContainerUpdate,
    ) -> EngineResult<OverheadCostContainer> {
        let _guard = self.lock_container(container_id).await?;
        let mut container = self.container_snapshot(container_id)?;
        if let Some(name) = update.name {
            container.name = name;
        }
        if let Some(pct) = update.materials_pct {
            container.materials_pct = pct;
        }
        if let Some(pct) = update.works_pct {
            container.works_pct = pct;
        }
        if let Some(total) = update.total {
            container.total = total;
        }
        if let Some(active) = update.is_active {
            container.is_active = active;
        }
        validate_container(&container)?;

        // 容器只在持有容器锁时写入, 此处的副本不会覆盖并发修改
        if let Some(pool) = &self.pool {
            queries::update_container(pool, &container).await?;
        }
        if let Some(mut slot) = self.store.container_mut(container_id) {
            *slot = container.clone();
        }

        for estimate_id in self.store.estimates_linking(container_id) {
            self.mutate(estimate_id, |_| Ok(()))?;
        }
        tracing::info!("Overhead container {} updated", container_id);
        Ok(container)
    }

    pub fn vat_status(&self, estimate_id: i64) -> EngineResult<VatConfig> {
        self.read(estimate_id, |e| Ok(e.vat.clone()))
    }

    pub async fn toggle_vat(&self, estimate_id: i64, active: bool) -> EngineResult<VatConfig> {
        let _guard = self.lock_estimate(estimate_id).await?;
        self.edit_vat(estimate_id, |vat| vat.active = active).await
    }

    pub async fn set_vat_rate(
        &self,
        estimate_id: i64,
        rate: BigDecimal,
    ) -> EngineResult<VatConfig> {
        ensure_bounded("vat_rate", &rate)?;
        if rate < BigDecimal::zero() {
            return Err(EngineError::invalid_input(
                "vat_rate",
                rate.to_string(),
                "VAT rate must not be negative",
            ));
        }
        let _guard = self.lock_estimate(estimate_id).await?;
        self.edit_vat(estimate_id, |vat| vat.rate_percent = rate).await
    }

    /// 新增或修改行映射, 卡片必须存在且有可计价版本
    pub async fn upsert_mapping(
        &self,
        estimate_id: i64,
        row_index: i64,
        card_id: i64,
        quantity: BigDecimal,
    ) -> EngineResult<RowMapping> {
        ensure_valid_quantity(&quantity)?;
        {
            let card = self
                .store
                .card(card_id)
                .ok_or_else(|| EngineError::not_found("technical card", card_id))?;
            if card.current_version().is_none() {
                return Err(EngineError::not_found("technical card version", card_id));
            }
        }
        let _guard = self.lock_estimate(estimate_id).await?;
        self.read(estimate_id, |e| {
            e.row(row_index)
                .map(|_| ())
                .ok_or_else(|| EngineError::not_found("estimate row", row_index))
        })?;

        if let Some(pool) = &self.pool {
            queries::upsert_row_mapping(pool, estimate_id, row_index, card_id, &quantity).await?;
        }

        let mapping = RowMapping {
            row_index,
            card_id,
            quantity,
        };
        let saved = mapping.clone();
        self.mutate(estimate_id, move |e| {
            match e.mappings.iter_mut().find(|m| m.row_index == row_index) {
                Some(existing) => *existing = mapping,
                None => {
                    e.mappings.push(mapping);
                    e.mappings.sort_by_key(|m| m.row_index);
                }
            }
            Ok(())
        })?;
        tracing::debug!("Estimate {}: row {} mapped to card {}", estimate_id, row_index, card_id);
        Ok(saved)
    }

    /// 返回是否确实删除了映射
    pub async fn clear_mapping(&self, estimate_id: i64, row_index: i64) -> EngineResult<bool> {
        let _guard = self.lock_estimate(estimate_id).await?;
        let exists = self.read(estimate_id, |e| Ok(e.mapping(row_index).is_some()))?;
        if !exists {
            return Ok(false);
        }
        if let Some(pool) = &self.pool {
            queries::delete_row_mapping(pool, estimate_id, row_index).await?;
        }
        self.mutate(estimate_id, |e| {
            e.mappings.retain(|m| m.row_index != row_index);
            Ok(())
        })?;
        Ok(true)
    }

    /// 外部修改流程的失效入口
    pub fn invalidate_overhead_context(&self, estimate_id: i64) -> EngineResult<()> {
        self.mutate(estimate_id, |_| Ok(()))
    }
}

fn validate_container(container: &OverheadCostContainer) -> EngineResult<()> {
    ensure_bounded("materials_pct", &container.materials_pct)?;
    ensure_bounded("works_pct", &container.works_pct)?;
    ensure_bounded("total", &container.total)?;

    let hundred = BigDecimal::from(100);
    for (field, value) in [
        ("materials_pct", &container.materials_pct),
        ("works_pct", &container.works_pct),
    ] {
        if *value < BigDecimal::zero() || *value > hundred {
            return Err(EngineError::invalid_input(
                field,
                value.to_string(),
                "percentage must be within 0..=100",
            ));
        }
    }
    if container.total < BigDecimal::zero() {
        return Err(EngineError::invalid_input(
            "total",
            container.total.to_string(),
            "overhead total must not be negative",
        ));
    }
    Ok(())
}
