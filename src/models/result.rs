use bigdecimal::{BigDecimal, Zero};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// 金额展示精度 (仅在输出边界取整)
pub const MONEY_SCALE: i64 = 2;

/// 输出取整到 2 位小数
pub fn round_money(value: &BigDecimal) -> BigDecimal {
    value.round(MONEY_SCALE).with_scale(MONEY_SCALE)
}

/// 行计算指标键, 顺序即展示顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricKey {
    UnitPriceOfMaterial,
    UnitPriceOfWork,
    UnitPriceOfMaterialsAndWorks,
    PriceForAllMaterialWithoutVat,
    PriceForAllWorkWithoutVat,
    TotalPriceWithoutVat,
    VatAmount,
    PriceForAllMaterial,
    PriceForAllWork,
    TotalPrice,
}

impl MetricKey {
    pub const ORDER: [MetricKey; 10] = [
        MetricKey::UnitPriceOfMaterial,
        MetricKey::UnitPriceOfWork,
        MetricKey::UnitPriceOfMaterialsAndWorks,
        MetricKey::PriceForAllMaterialWithoutVat,
        MetricKey::PriceForAllWorkWithoutVat,
        MetricKey::TotalPriceWithoutVat,
        MetricKey::VatAmount,
        MetricKey::PriceForAllMaterial,
        MetricKey::PriceForAllWork,
        MetricKey::TotalPrice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKey::UnitPriceOfMaterial => "UNIT_PRICE_OF_MATERIAL",
            MetricKey::UnitPriceOfWork => "UNIT_PRICE_OF_WORK",
            MetricKey::UnitPriceOfMaterialsAndWorks => "UNIT_PRICE_OF_MATERIALS_AND_WORKS",
            MetricKey::PriceForAllMaterialWithoutVat => "PRICE_FOR_ALL_MATERIAL_WITHOUT_VAT",
            MetricKey::PriceForAllWorkWithoutVat => "PRICE_FOR_ALL_WORK_WITHOUT_VAT",
            MetricKey::TotalPriceWithoutVat => "TOTAL_PRICE_WITHOUT_VAT",
            MetricKey::VatAmount => "VAT_AMOUNT",
            MetricKey::PriceForAllMaterial => "PRICE_FOR_ALL_MATERIAL",
            MetricKey::PriceForAllWork => "PRICE_FOR_ALL_WORK",
            MetricKey::TotalPrice => "TOTAL_PRICE",
        }
    }
}

/// 技术卡片基础成本 (未计间接费与增值税)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseCost {
    /// Σ(耗量 × 单价), 未加价
    pub base_unit_material: BigDecimal,
    pub base_unit_work: BigDecimal,
    /// 卡片加价后的单价
    pub unit_material_price: BigDecimal,
    pub unit_work_price: BigDecimal,
    pub total_material_price: BigDecimal,
    pub total_work_price: BigDecimal,
}

/// 单行完整指标集, 字段全部为未取整的精确值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineResult {
    pub unit_price_of_material: BigDecimal,
    pub unit_price_of_work: BigDecimal,
    pub unit_price_of_materials_and_works: BigDecimal,
    pub price_for_all_material_without_vat: BigDecimal,
    pub price_for_all_work_without_vat: BigDecimal,
    pub total_price_without_vat: BigDecimal,
    pub vat_amount: BigDecimal,
    pub price_for_all_material: BigDecimal,
    pub price_for_all_work: BigDecimal,
    pub total_price: BigDecimal,
}

impl LineResult {
    pub fn get(&self, key: MetricKey) -> &BigDecimal {
        match key {
            MetricKey::UnitPriceOfMaterial => &self.unit_price_of_material,
            MetricKey::UnitPriceOfWork => &self.unit_price_of_work,
            MetricKey::UnitPriceOfMaterialsAndWorks => &self.unit_price_of_materials_and_works,
            MetricKey::PriceForAllMaterialWithoutVat => &self.price_for_all_material_without_vat,
            MetricKey::PriceForAllWorkWithoutVat => &self.price_for_all_work_without_vat,
            MetricKey::TotalPriceWithoutVat => &self.total_price_without_vat,
            MetricKey::VatAmount => &self.vat_amount,
            MetricKey::PriceForAllMaterial => &self.price_for_all_material,
            MetricKey::PriceForAllWork => &self.price_for_all_work,
            MetricKey::TotalPrice => &self.total_price,
        }
    }

    /// 按展示顺序输出, 值取整到 2 位
    pub fn ordered(&self) -> Vec<(MetricKey, BigDecimal)> {
        MetricKey::ORDER
            .iter()
            .map(|k| (*k, round_money(self.get(*k))))
            .collect()
    }

    /// 展示边界的 {calc, order} 视图
    pub fn to_view(&self) -> LineView {
        let calc: IndexMap<String, BigDecimal> = self
            .ordered()
            .into_iter()
            .map(|(k, v)| (k.as_str().to_string(), v))
            .collect();
        LineView {
            order: MetricKey::ORDER.iter().map(|k| k.as_str().to_string()).collect(),
            calc,
        }
    }
}

/// 序列化给渲染/导出方的结构
#[derive(Debug, Clone, Serialize)]
pub struct LineView {
    pub calc: IndexMap<String, BigDecimal>,
    pub order: Vec<String>,
}

/// 批量计算的单行成功结果
#[derive(Debug, Clone, Serialize)]
pub struct RowResult {
    pub row_index: i64,
    pub card_id: i64,
    pub quantity: BigDecimal,
    pub result: LineResult,
}

/// 批量计算的单行错误
#[derive(Debug, Clone, Serialize)]
pub struct RowError {
    pub row_index: i64,
    pub code: &'static str,
    pub error: String,
}

/// 批量结果: 按 row_index 对账, 不保证与输入顺序一致
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<RowResult>,
    pub errors: Vec<RowError>,
}

/// 节点汇总 (材料 / 工作 / 合计)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTotals {
    pub material: BigDecimal,
    pub work: BigDecimal,
    pub total: BigDecimal,
    /// 直接或间接贡献的行数
    pub rows: usize,
}

impl NodeTotals {
    pub fn zero() -> Self {
        Self {
            material: BigDecimal::zero(),
            work: BigDecimal::zero(),
            total: BigDecimal::zero(),
            rows: 0,
        }
    }

    pub fn add_line(&mut self, line: &LineResult) {
        self.material += &line.price_for_all_material;
        self.work += &line.price_for_all_work;
        self.total += &line.total_price;
        self.rows += 1;
    }

    pub fn absorb(&mut self, child: &NodeTotals) {
        self.material += &child.material;
        self.work += &child.work;
        self.total += &child.total;
        self.rows += child.rows;
    }

    /// 无贡献行的节点不显示合计徽标
    pub fn has_badge(&self) -> bool {
        self.rows > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money(&dec("1.005")).to_string(), "1.01");
        assert_eq!(round_money(&dec("1100")).to_string(), "1100.00");
        assert_eq!(round_money(&dec("2.344")).to_string(), "2.34");
    }

    #[test]
    fn test_metric_order_is_stable() {
        let names: Vec<_> = MetricKey::ORDER.iter().map(|k| k.as_str()).collect();
        assert_eq!(names[0], "UNIT_PRICE_OF_MATERIAL");
        assert_eq!(names[2], "UNIT_PRICE_OF_MATERIALS_AND_WORKS");
        assert_eq!(names[9], "TOTAL_PRICE");
    }

    #[test]
    fn test_node_totals_badge() {
        let mut totals = NodeTotals::zero();
        assert!(!totals.has_badge());
        totals.absorb(&NodeTotals {
            material: dec("1"),
            work: dec("2"),
            total: dec("3"),
            rows: 1,
        });
        assert!(totals.has_badge());
        assert_eq!(totals.total, dec("3"));
    }
}
