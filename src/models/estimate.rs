use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::EstimateOverheadCostLink;

/// 增值税配置 (НДС)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatConfig {
    pub active: bool,
    pub rate_percent: BigDecimal,
}

impl VatConfig {
    pub fn inactive() -> Self {
        Self {
            active: false,
            rate_percent: BigDecimal::from(20),
        }
    }

    pub fn active(rate_percent: BigDecimal) -> Self {
        Self {
            active: true,
            rate_percent,
        }
    }
}

/// 导入估算单中的一行 (叶子数据)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EstimateRow {
    pub row_index: i64,
    pub name: String,
    pub unit: String,
    /// 如 "A / A.1", 为空时归入根节点
    pub section_path: Option<String>,
}

/// 行到技术卡片的映射
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RowMapping {
    pub row_index: i64,
    pub card_id: i64,
    pub quantity: BigDecimal,
}

/// 估算单: 计价的顶层文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Estimate {
    pub id: i64,
    pub name: String,
    pub vat: VatConfig,
    /// 按 order 排序
    pub overhead_links: Vec<EstimateOverheadCostLink>,
    pub rows: Vec<EstimateRow>,
    /// 每行最多一个映射, 按 row_index 排序
    pub mappings: Vec<RowMapping>,
    /// 每次变更 +1, 用于判定上下文缓存是否过期
    pub revision: u64,
}

impl Estimate {
    pub fn new(id: i64, name: impl Into<String>, vat: VatConfig) -> Self {
        Self {
            id,
            name: name.into(),
            vat,
            overhead_links: Vec::new(),
            rows: Vec::new(),
            mappings: Vec::new(),
            revision: 0,
        }
    }

    pub fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn row(&self, row_index: i64) -> Option<&EstimateRow> {
        self.rows.iter().find(|r| r.row_index == row_index)
    }

    pub fn mapping(&self, row_index: i64) -> Option<&RowMapping> {
        self.mappings.iter().find(|m| m.row_index == row_index)
    }

    pub fn link(&self, link_id: i64) -> Option<&EstimateOverheadCostLink> {
        self.overhead_links.iter().find(|l| l.id == link_id)
    }

    pub fn link_mut(&mut self, link_id: i64) -> Option<&mut EstimateOverheadCostLink> {
        self.overhead_links.iter_mut().find(|l| l.id == link_id)
    }
}

/// 估算单主表行 (t_estimate)
#[derive(Debug, Clone, FromRow)]
pub struct EstimateHeaderRow {
    pub id: i64,
    pub name: String,
    pub vat_active: bool,
    pub vat_rate: Option<BigDecimal>,
}

/// 带估算单 ID 的行 (批量加载用)
#[derive(Debug, Clone, FromRow)]
pub struct EstimateRowRecord {
    pub estimate_id: i64,
    pub row_index: i64,
    pub name: String,
    pub unit: String,
    pub section_path: Option<String>,
}

impl From<EstimateRowRecord> for EstimateRow {
    fn from(r: EstimateRowRecord) -> Self {
        Self {
            row_index: r.row_index,
            name: r.name,
            unit: r.unit,
            section_path: r.section_path,
        }
    }
}

/// 带估算单 ID 的映射 (批量加载用)
#[derive(Debug, Clone, FromRow)]
pub struct RowMappingRecord {
    pub estimate_id: i64,
    pub row_index: i64,
    pub card_id: i64,
    pub quantity: BigDecimal,
}

impl From<RowMappingRecord> for RowMapping {
    fn from(r: RowMappingRecord) -> Self {
        Self {
            row_index: r.row_index,
            card_id: r.card_id,
            quantity: r.quantity,
        }
    }
}
