use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 技术卡片 (ТК) - 标准化的工料模板
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalCard {
    pub id: i64,
    pub name: String,
    pub unit: String,
    pub markups: CardMarkups,
    /// 全部版本, 旧版本只读
    pub versions: Vec<TechnicalCardVersion>,
}

impl TechnicalCard {
    /// 当前计价版本: 版本号最大的已发布版本, 没有已发布版本时取版本号最大者
    pub fn current_version(&self) -> Option<&TechnicalCardVersion> {
        self.versions
            .iter()
            .filter(|v| v.is_published)
            .max_by_key(|v| v.version)
            .or_else(|| self.versions.iter().max_by_key(|v| v.version))
    }
}

/// 卡片级加价 (百分比, 0 表示不加价)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardMarkups {
    pub materials_markup_pct: BigDecimal,
    pub works_markup_pct: BigDecimal,
    pub transport_pct: BigDecimal,
    pub materials_margin_pct: BigDecimal,
    pub works_margin_pct: BigDecimal,
}

impl CardMarkups {
    pub fn is_zero(&self) -> bool {
        self.materials_markup_pct.is_zero()
            && self.works_markup_pct.is_zero()
            && self.transport_pct.is_zero()
            && self.materials_margin_pct.is_zero()
            && self.works_margin_pct.is_zero()
    }
}

/// 卡片版本: 有序的材料行与工作行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalCardVersion {
    pub id: i64,
    pub version: i32,
    pub is_published: bool,
    pub materials: Vec<ResourceLine>,
    pub works: Vec<ResourceLine>,
}

/// 材料行/工作行: 单位耗量 × 单价
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ResourceLine {
    pub qty_per_unit: BigDecimal,
    pub price_per_unit: BigDecimal,
}

impl ResourceLine {
    pub fn new(qty_per_unit: BigDecimal, price_per_unit: BigDecimal) -> Self {
        Self {
            qty_per_unit,
            price_per_unit,
        }
    }

    pub fn cost(&self) -> BigDecimal {
        &self.qty_per_unit * &self.price_per_unit
    }
}

/// 卡片主表行 (t_tc_card)
#[derive(Debug, Clone, FromRow)]
pub struct CardRow {
    pub id: i64,
    pub name: String,
    pub unit: String,
    pub materials_markup_pct: Option<BigDecimal>,
    pub works_markup_pct: Option<BigDecimal>,
    pub transport_pct: Option<BigDecimal>,
    pub materials_margin_pct: Option<BigDecimal>,
    pub works_margin_pct: Option<BigDecimal>,
}

/// 版本表行 (t_tc_version)
#[derive(Debug, Clone, FromRow)]
pub struct CardVersionRow {
    pub id: i64,
    pub card_id: i64,
    pub version: i32,
    pub is_published: bool,
}

/// 资源行表行 (t_tc_material_line / t_tc_work_line), 按 line_no 排序读取
#[derive(Debug, Clone, FromRow)]
pub struct CardLineRow {
    pub version_id: i64,
    pub qty_per_unit: Option<BigDecimal>,
    pub price_per_unit: Option<BigDecimal>,
}

impl From<CardLineRow> for ResourceLine {
    fn from(row: CardLineRow) -> Self {
        Self {
            qty_per_unit: row.qty_per_unit.unwrap_or_else(BigDecimal::zero),
            price_per_unit: row.price_per_unit.unwrap_or_else(BigDecimal::zero),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn version(id: i64, version: i32, is_published: bool) -> TechnicalCardVersion {
        TechnicalCardVersion {
            id,
            version,
            is_published,
            materials: Vec::new(),
            works: Vec::new(),
        }
    }

    fn card(versions: Vec<TechnicalCardVersion>) -> TechnicalCard {
        TechnicalCard {
            id: 1,
            name: "Кладка".to_string(),
            unit: "м3".to_string(),
            markups: CardMarkups::default(),
            versions,
        }
    }

    #[test]
    fn test_current_version_prefers_latest_published() {
        let c = card(vec![version(10, 1, true), version(11, 2, true), version(12, 3, false)]);
        assert_eq!(c.current_version().map(|v| v.id), Some(11));
    }

    #[test]
    fn test_current_version_falls_back_to_latest_draft() {
        let c = card(vec![version(10, 1, false), version(11, 2, false)]);
        assert_eq!(c.current_version().map(|v| v.id), Some(11));
    }

    #[test]
    fn test_card_without_versions_has_no_current() {
        assert!(card(Vec::new()).current_version().is_none());
    }

    #[test]
    fn test_line_cost() {
        let line = ResourceLine::new(
            BigDecimal::from_str("2.5").unwrap(),
            BigDecimal::from_str("40.00").unwrap(),
        );
        assert_eq!(line.cost(), BigDecimal::from(100));
    }
}
