use crate::models::{
    CardLineRow, CardRow, CardVersionRow, EstimateHeaderRow, EstimateOverheadCostLink,
    EstimateRowRecord, OverheadCostContainer, OverheadLinkRecord, RowMappingRecord,
};
use bigdecimal::BigDecimal;
use sqlx::PgPool;

/// 查询技术卡片主表
pub async fn list_cards(pool: &PgPool) -> Result<Vec<CardRow>, sqlx::Error> {
    sqlx::query_as::<_, CardRow>(
        r#"
        SELECT id, name, unit,
               materials_markup_pct, works_markup_pct, transport_pct,
               materials_margin_pct, works_margin_pct
        FROM t_tc_card
        "#
    )
    .fetch_all(pool)
    .await
}

/// 查询卡片版本
pub async fn list_card_versions(pool: &PgPool) -> Result<Vec<CardVersionRow>, sqlx::Error> {
    sqlx::query_as::<_, CardVersionRow>(
        r#"
        SELECT id, card_id, version, is_published
        FROM t_tc_version
        ORDER BY card_id, version
        "#
    )
    .fetch_all(pool)
    .await
}

/// 查询材料行 (按行号保序)
pub async fn list_material_lines(pool: &PgPool) -> Result<Vec<CardLineRow>, sqlx::Error> {
    sqlx::query_as::<_, CardLineRow>(
        r#"
        SELECT version_id, qty_per_unit, price_per_unit
        FROM t_tc_material_line
        ORDER BY version_id, line_no, id
        "#
    )
    .fetch_all(pool)
    .await
}

/// 查询工作行 (按行号保序)
pub async fn list_work_lines(pool: &PgPool) -> Result<Vec<CardLineRow>, sqlx::Error> {
    sqlx::query_as::<_, CardLineRow>(
        r#"
        SELECT version_id, qty_per_unit, price_per_unit
        FROM t_tc_work_line
        ORDER BY version_id, line_no, id
        "#
    )
    .fetch_all(pool)
    .await
}

/// 查询估算单主表
pub async fn list_estimates(pool: &PgPool) -> Result<Vec<EstimateHeaderRow>, sqlx::Error> {
    sqlx::query_as::<_, EstimateHeaderRow>(
        r#"
        SELECT id, name, vat_active, vat_rate
        FROM t_estimate
        "#
    )
    .fetch_all(pool)
    .await
}

/// 查询估算单行
pub async fn list_estimate_rows(pool: &PgPool) -> Result<Vec<EstimateRowRecord>, sqlx::Error> {
    sqlx::query_as::<_, EstimateRowRecord>(
        r#"
        SELECT estimate_id, row_index, name, unit, section_path
        FROM t_estimate_row
        ORDER BY estimate_id, row_index
        "#
    )
    .fetch_all(pool)
    .await
}

/// 查询行映射
pub async fn list_row_mappings(pool: &PgPool) -> Result<Vec<RowMappingRecord>, sqlx::Error> {
    sqlx::query_as::<_, RowMappingRecord>(
        r#"
        SELECT estimate_id, row_index, card_id, quantity
        FROM t_estimate_row_mapping
        ORDER BY estimate_id, row_index
        "#
    )
    .fetch_all(pool)
    .await
}

/// 查询间接费容器
pub async fn list_containers(pool: &PgPool) -> Result<Vec<OverheadCostContainer>, sqlx::Error> {
    sqlx::query_as::<_, OverheadCostContainer>(
        r#"
        SELECT id, name,
               coalesce(materials_pct, 0) as materials_pct,
               coalesce(works_pct, 0) as works_pct,
               coalesce(total, 0) as total,
               is_active
        FROM t_overhead_container
        "#
    )
    .fetch_all(pool)
    .await
}

/// 查询估算单间接费链接
pub async fn list_overhead_links(pool: &PgPool) -> Result<Vec<OverheadLinkRecord>, sqlx::Error> {
    sqlx::query_as::<_, OverheadLinkRecord>(
        r#"
        SELECT estimate_id, id, container_id, is_active, quantity,
               snapshot_total, snapshot_materials_pct, snapshot_works_pct,
               sort_order as "order", applied_at
        FROM t_estimate_overhead_link
        ORDER BY estimate_id, sort_order, id
        "#
    )
    .fetch_all(pool)
    .await
}

/// 新增间接费链接
pub async fn insert_overhead_link(
    pool: &PgPool,
    estimate_id: i64,
    link: &EstimateOverheadCostLink,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO t_estimate_overhead_link (
            id, estimate_id, container_id, is_active, quantity,
            snapshot_total, snapshot_materials_pct, snapshot_works_pct,
            sort_order, applied_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#
    )
    .bind(link.id)
    .bind(estimate_id)
    .bind(link.container_id)
    .bind(link.is_active)
    .bind(link.quantity)
    .bind(link.snapshot_total.clone())
    .bind(link.snapshot_materials_pct.clone())
    .bind(link.snapshot_works_pct.clone())
    .bind(link.order)
    .bind(link.applied_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// 更新链接的状态、倍数与快照
pub async fn update_overhead_link(
    pool: &PgPool,
    estimate_id: i64,
    link: &EstimateOverheadCostLink,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE t_estimate_overhead_link
        SET is_active = $3,
            quantity = $4,
            snapshot_total = $5,
            snapshot_materials_pct = $6,
            snapshot_works_pct = $7,
            applied_at = $8
        WHERE id = $1 AND estimate_id = $2
        "#
    )
    .bind(link.id)
    .bind(estimate_id)
    .bind(link.is_active)
    .bind(link.quantity)
    .bind(link.snapshot_total.clone())
    .bind(link.snapshot_materials_pct.clone())
    .bind(link.snapshot_works_pct.clone())
    .bind(link.applied_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// 删除间接费链接
pub async fn delete_overhead_link(
    pool: &PgPool,
    estimate_id: i64,
    link_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM t_estimate_overhead_link WHERE id = $1 AND estimate_id = $2")
        .bind(link_id)
        .bind(estimate_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// 更新增值税配置
pub async fn update_vat(
    pool: &PgPool,
    estimate_id: i64,
    vat_active: bool,
    vat_rate: &BigDecimal,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE t_estimate SET vat_active = $2, vat_rate = $3 WHERE id = $1")
        .bind(estimate_id)
        .bind(vat_active)
        .bind(vat_rate.clone())
        .execute(pool)
        .await?;
    Ok(())
}

/// 新增或更新行映射
pub async fn upsert_row_mapping(
    pool: &PgPool,
    estimate_id: i64,
    row_index: i64,
    card_id: i64,
    quantity: &BigDecimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO t_estimate_row_mapping (estimate_id, row_index, card_id, quantity)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (estimate_id, row_index)
        DO UPDATE SET card_id = EXCLUDED.card_id, quantity = EXCLUDED.quantity
        "#
    )
    .bind(estimate_id)
    .bind(row_index)
    .bind(card_id)
    .bind(quantity.clone())
    .execute(pool)
    .await?;
    Ok(())
}

/// 删除行映射
pub async fn delete_row_mapping(
    pool: &PgPool,
    estimate_id: i64,
    row_index: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM t_estimate_row_mapping WHERE estimate_id = $1 AND row_index = $2")
        .bind(estimate_id)
        .bind(row_index)
        .execute(pool)
        .await?;
    Ok(())
}

/// 更新容器定义 (已有链接的快照不变)
pub async fn update_container(
    pool: &PgPool,
    container: &OverheadCostContainer,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE t_overhead_container
        SET name = $2, materials_pct = $3, works_pct = $4, total = $5, is_active = $6
        WHERE id = $1
        "#
    )
    .bind(container.id)
    .bind(&container.name)
    .bind(container.materials_pct.clone())
    .bind(container.works_pct.clone())
    .bind(container.total.clone())
    .bind(container.is_active)
    .execute(pool)
    .await?;
    Ok(())
}
