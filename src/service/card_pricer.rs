use crate::error::{EngineError, EngineResult};
use crate::models::{BaseCost, CardMarkups, ResourceLine, TechnicalCardVersion};
use crate::store::EstimateStore;
use bigdecimal::{BigDecimal, Zero};
use std::str::FromStr;
use std::sync::Arc;

/// 解析数量: 接受逗号或点作为小数分隔符, 拒绝非正数与超限数值
pub fn parse_quantity(raw: &str) -> EngineResult<BigDecimal> {
    let normalized = raw.trim().replace(' ', "").replace(',', ".");
    let value = BigDecimal::from_str(&normalized)
        .map_err(|_| EngineError::invalid_input("quantity", raw, "not a decimal number"))?;
    ensure_valid_quantity(&value)?;
    Ok(value)
}

/// 从 JSON 值解析数量 (字符串或数字)
pub fn parse_quantity_value(raw: &serde_json::Value) -> EngineResult<BigDecimal> {
    match raw {
        serde_json::Value::String(s) => parse_quantity(s),
        serde_json::Value::Number(n) => parse_quantity(&n.to_string()),
        other => Err(EngineError::invalid_input(
            "quantity",
            other.to_string(),
            "expected a number or a numeric string",
        )),
    }
}

/// 整数位上限
pub const MAX_INTEGER_DIGITS: i64 = 18;
/// 小数位上限
pub const MAX_FRACTION_DIGITS: i64 = 30;

/// 拒绝位数超限的数值, 如 "1e2000000"
///
/// 取整到 2 位时会把指数展开成完整整数, 必须在进入计算前拦下。
pub fn ensure_bounded(field: &'static str, value: &BigDecimal) -> EngineResult<()> {
    let (mantissa, scale) = value.as_bigint_and_exponent();
    let digits = value.digits();
    let integer_digits = digits as i64 - scale;
    if scale > MAX_FRACTION_DIGITS || integer_digits > MAX_INTEGER_DIGITS {
        // 不能用 Display, 它同样会展开指数
        let shown = if digits > 40 {
            format!("{}-digit value", digits)
        } else {
            format!("{}E{}", mantissa, -scale)
        };
        return Err(EngineError::invalid_input(
            field,
            shown,
            format!(
                "at most {} integer and {} fractional digits are allowed",
                MAX_INTEGER_DIGITS, MAX_FRACTION_DIGITS
            ),
        ));
    }
    Ok(())
}

/// 数量必须有界且大于 0
pub fn ensure_valid_quantity(quantity: &BigDecimal) -> EngineResult<()> {
    ensure_bounded("quantity", quantity)?;
    if *quantity <= BigDecimal::zero() {
        return Err(EngineError::invalid_input(
            "quantity",
            quantity.to_string(),
            "quantity must be greater than zero",
        ));
    }
    Ok(())
}

fn sum_lines(lines: &[ResourceLine]) -> BigDecimal {
    lines
        .iter()
        .fold(BigDecimal::zero(), |acc, line| acc + line.cost())
}

fn pct(value: &BigDecimal) -> BigDecimal {
    value / BigDecimal::from(100)
}

/// 计算版本的基础成本, 纯函数
///
/// 单价 = 基价 × (1 + 加价% + 运输%) × (1 + 利润%), 加价全为 0 时即基价。
/// 中间值不取整。
pub fn base_cost(
    version: &TechnicalCardVersion,
    markups: &CardMarkups,
    quantity: &BigDecimal,
) -> EngineResult<BaseCost> {
    ensure_valid_quantity(quantity)?;

    let base_unit_material = sum_lines(&version.materials);
    let base_unit_work = sum_lines(&version.works);

    let (unit_material_price, unit_work_price) = if markups.is_zero() {
        (base_unit_material.clone(), base_unit_work.clone())
    } else {
        let one = BigDecimal::from(1);
        let transport = pct(&markups.transport_pct);
        let mat = &base_unit_material
            * (&one + pct(&markups.materials_markup_pct) + &transport)
            * (&one + pct(&markups.materials_margin_pct));
        let work = &base_unit_work
            * (&one + pct(&markups.works_markup_pct) + &transport)
            * (&one + pct(&markups.works_margin_pct));
        (mat, work)
    };

    Ok(BaseCost {
        total_material_price: &unit_material_price * quantity,
        total_work_price: &unit_work_price * quantity,
        base_unit_material,
        base_unit_work,
        unit_material_price,
        unit_work_price,
    })
}

/// 技术卡片计价器
pub struct CardPricer {
    store: Arc<EstimateStore>,
}

impl CardPricer {
    pub fn new(store: Arc<EstimateStore>) -> Self {
        Self { store }
    }

    pub fn price_card(&self, card_id: i64, quantity: &BigDecimal) -> EngineResult<BaseCost> {
        let card = self
            .store
            .card(card_id)
            .ok_or_else(|| EngineError::not_found("technical card", card_id))?;
        let version = card
            .current_version()
            .ok_or_else(|| EngineError::not_found("technical card version", card_id))?;

        base_cost(version, &card.markups, quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TechnicalCard;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn version() -> TechnicalCardVersion {
        TechnicalCardVersion {
            id: 100,
            version: 1,
            is_published: true,
            materials: vec![ResourceLine::new(dec("2"), dec("50.00"))],
            works: vec![ResourceLine::new(dec("1"), dec("30.00"))],
        }
    }

    fn pricer() -> CardPricer {
        let store = Arc::new(EstimateStore::new());
        store.insert_card(TechnicalCard {
            id: 1,
            name: "Штукатурка".to_string(),
            unit: "м2".to_string(),
            markups: CardMarkups::default(),
            versions: vec![version()],
        });
        store.insert_card(TechnicalCard {
            id: 2,
            name: "Черновик".to_string(),
            unit: "м2".to_string(),
            markups: CardMarkups::default(),
            versions: Vec::new(),
        });
        CardPricer::new(store)
    }

    #[test]
    fn test_price_card_unit_and_totals() {
        let cost = pricer().price_card(1, &dec("10")).unwrap();
        assert_eq!(cost.unit_material_price, dec("100.00"));
        assert_eq!(cost.unit_work_price, dec("30.00"));
        assert_eq!(cost.total_material_price, dec("1000"));
        assert_eq!(cost.total_work_price, dec("300"));
    }

    #[test]
    fn test_unknown_card_and_missing_version() {
        let p = pricer();
        assert_eq!(p.price_card(9, &dec("1")).unwrap_err().error_code(), "NOT_FOUND");
        assert_eq!(p.price_card(2, &dec("1")).unwrap_err().error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_non_positive_quantity_rejected() {
        let p = pricer();
        assert_eq!(p.price_card(1, &dec("0")).unwrap_err().error_code(), "INVALID_INPUT");
        assert_eq!(p.price_card(1, &dec("-2")).unwrap_err().error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_markups_apply_before_quantity() {
        let markups = CardMarkups {
            materials_markup_pct: dec("10"),
            transport_pct: dec("5"),
            materials_margin_pct: dec("20"),
            ..CardMarkups::default()
        };
        let cost = base_cost(&version(), &markups, &dec("2")).unwrap();
        // 100 × 1.15 × 1.20 = 138; 工作仅受运输影响: 30 × 1.05 = 31.5
        assert_eq!(cost.base_unit_material, dec("100"));
        assert_eq!(cost.unit_material_price, dec("138"));
        assert_eq!(cost.unit_work_price, dec("31.5"));
        assert_eq!(cost.total_material_price, dec("276"));
    }

    #[test]
    fn test_parse_quantity_accepts_comma() {
        assert_eq!(parse_quantity("12,5").unwrap(), dec("12.5"));
        assert_eq!(parse_quantity(" 3.25 ").unwrap(), dec("3.25"));
    }

    #[test]
    fn test_parse_quantity_rejects_garbage() {
        for raw in ["", "abc", "NaN", "inf", "0", "-1,5", "1,2,3"] {
            let err = parse_quantity(raw).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_INPUT", "input {:?}", raw);
        }
    }

    #[test]
    fn test_parse_quantity_rejects_oversized_magnitudes() {
        for raw in ["1e200000", "1E2000000", "-1e200000", "1e-200000", "1234567890123456789"] {
            let err = parse_quantity(raw).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_INPUT", "input {:?}", raw);
            assert!(err.to_string().len() < 200, "input {:?}", raw);
        }
        let long_literal = "9".repeat(5000);
        assert!(parse_quantity(&long_literal).unwrap_err().to_string().len() < 200);
        assert_eq!(parse_quantity("123456789012345678").unwrap(), dec("123456789012345678"));
        assert_eq!(parse_quantity("1e3").unwrap(), dec("1000"));
        assert_eq!(parse_quantity("0,000001").unwrap(), dec("0.000001"));
    }

    #[test]
    fn test_base_cost_rejects_oversized_quantity() {
        let huge = BigDecimal::new(1.into(), -200_000);
        let err = base_cost(&version(), &CardMarkups::default(), &huge).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_parse_quantity_value_variants() {
        assert_eq!(parse_quantity_value(&serde_json::json!(4)).unwrap(), dec("4"));
        assert_eq!(parse_quantity_value(&serde_json::json!("0,75")).unwrap(), dec("0.75"));
        assert!(parse_quantity_value(&serde_json::json!(null)).is_err());
    }
}
