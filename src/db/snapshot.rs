use crate::db::queries;
use crate::models::{
    CardLineRow, CardMarkups, CardRow, CardVersionRow, Estimate, EstimateHeaderRow,
    EstimateRowRecord, OverheadCostContainer, OverheadLinkRecord, ResourceLine, RowMappingRecord,
    TechnicalCard, TechnicalCardVersion, VatConfig,
};
use crate::store::EstimateStore;
use bigdecimal::{BigDecimal, Zero};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Instant;

/// 数据库中的全部计价输入
#[derive(Debug, Default)]
pub struct Snapshot {
    pub cards: Vec<CardRow>,
    pub versions: Vec<CardVersionRow>,
    pub material_lines: Vec<CardLineRow>,
    pub work_lines: Vec<CardLineRow>,
    pub estimates: Vec<EstimateHeaderRow>,
    pub rows: Vec<EstimateRowRecord>,
    pub mappings: Vec<RowMappingRecord>,
    pub containers: Vec<OverheadCostContainer>,
    pub links: Vec<OverheadLinkRecord>,
}

/// 并发读取全部表
pub async fn fetch_snapshot(pool: &PgPool) -> Result<Snapshot, sqlx::Error> {
    let start = Instant::now();
    let (cards, versions, material_lines, work_lines, estimates) = futures::try_join!(
        queries::list_cards(pool),
        queries::list_card_versions(pool),
        queries::list_material_lines(pool),
        queries::list_work_lines(pool),
        queries::list_estimates(pool),
    )?;
    let (rows, mappings, containers, links) = futures::try_join!(
        queries::list_estimate_rows(pool),
        queries::list_row_mappings(pool),
        queries::list_containers(pool),
        queries::list_overhead_links(pool),
    )?;

    tracing::info!(
        "Snapshot fetched: {} cards, {} versions, {} estimates, {} rows, {} links, 耗时: {:?}",
        cards.len(),
        versions.len(),
        estimates.len(),
        rows.len(),
        links.len(),
        start.elapsed()
    );

    Ok(Snapshot {
        cards,
        versions,
        material_lines,
        work_lines,
        estimates,
        rows,
        mappings,
        containers,
        links,
    })
}

fn group_lines(lines: Vec<CardLineRow>) -> HashMap<i64, Vec<ResourceLine>> {
    let mut by_version: HashMap<i64, Vec<ResourceLine>> = HashMap::new();
    for line in lines {
        by_version
            .entry(line.version_id)
            .or_default()
            .push(ResourceLine::from(line));
    }
    by_version
}

fn pct_or_zero(value: Option<BigDecimal>) -> BigDecimal {
    value.unwrap_or_else(BigDecimal::zero)
}

/// 将快照装入内存库
pub fn populate_store(snapshot: Snapshot, default_vat_rate: u32) -> EstimateStore {
    let store = EstimateStore::new();

    let mut materials = group_lines(snapshot.material_lines);
    let mut works = group_lines(snapshot.work_lines);

    let mut versions_by_card: HashMap<i64, Vec<TechnicalCardVersion>> = HashMap::new();
    for v in snapshot.versions {
        versions_by_card
            .entry(v.card_id)
            .or_default()
            .push(TechnicalCardVersion {
                id: v.id,
                version: v.version,
                is_published: v.is_published,
                materials: materials.remove(&v.id).unwrap_or_default(),
                works: works.remove(&v.id).unwrap_or_default(),
            });
    }

    for c in snapshot.cards {
        store.insert_card(TechnicalCard {
            id: c.id,
            name: c.name,
            unit: c.unit,
            markups: CardMarkups {
                materials_markup_pct: pct_or_zero(c.materials_markup_pct),
                works_markup_pct: pct_or_zero(c.works_markup_pct),
                transport_pct: pct_or_zero(c.transport_pct),
                materials_margin_pct: pct_or_zero(c.materials_margin_pct),
                works_margin_pct: pct_or_zero(c.works_margin_pct),
            },
            versions: versions_by_card.remove(&c.id).unwrap_or_default(),
        });
    }

    for container in snapshot.containers {
        store.insert_container(container);
    }

    let mut estimates: HashMap<i64, Estimate> = snapshot
        .estimates
        .into_iter()
        .map(|h| {
            let vat = VatConfig {
                active: h.vat_active,
                rate_percent: h
                    .vat_rate
                    .unwrap_or_else(|| BigDecimal::from(default_vat_rate)),
            };
            (h.id, Estimate::new(h.id, h.name, vat))
        })
        .collect();

    for r in snapshot.rows {
        if let Some(e) = estimates.get_mut(&r.estimate_id) {
            e.rows.push(r.into());
        }
    }
    for m in snapshot.mappings {
        if let Some(e) = estimates.get_mut(&m.estimate_id) {
            e.mappings.push(m.into());
        }
    }
    for l in snapshot.links {
        if let Some(e) = estimates.get_mut(&l.estimate_id) {
            e.overhead_links.push(l.link);
        }
    }

    for (_, estimate) in estimates {
        store.insert_estimate(estimate);
    }

    tracing::info!(
        "Store populated: {} cards, {} estimates",
        store.card_count(),
        store.estimate_count()
    );

    store
}

/// 读取数据库并构建内存库
pub async fn load_store(
    pool: &PgPool,
    default_vat_rate: u32,
) -> Result<EstimateStore, sqlx::Error> {
    let snapshot = fetch_snapshot(pool).await?;
    Ok(populate_store(snapshot, default_vat_rate))
}
