use crate::error::EngineResult;
use crate::models::{BaseCost, LineResult, OverheadContext, VatConfig};
use crate::service::CardPricer;
use bigdecimal::{BigDecimal, Zero};
use std::sync::Arc;

fn markup_factor(percent: &BigDecimal) -> BigDecimal {
    BigDecimal::from(1) + percent / BigDecimal::from(100)
}

/// 由基础成本组装完整指标集, 纯函数
///
/// 顺序固定: 间接费分别加到材料和工作上, 再计增值税。
pub fn assemble_line(base: &BaseCost, overhead: &OverheadContext, vat: &VatConfig) -> LineResult {
    let unit_both = &base.unit_material_price + &base.unit_work_price;

    let material_no_vat = &base.total_material_price * markup_factor(&overhead.avg_materials_pct);
    let work_no_vat = &base.total_work_price * markup_factor(&overhead.avg_works_pct);
    let total_no_vat = &material_no_vat + &work_no_vat;

    let (vat_amount, material, work, total) = if vat.active {
        let rate = &vat.rate_percent / BigDecimal::from(100);
        let vat_amount = &total_no_vat * &rate;
        let factor = markup_factor(&vat.rate_percent);
        (
            vat_amount.clone(),
            &material_no_vat * &factor,
            &work_no_vat * &factor,
            &total_no_vat + &vat_amount,
        )
    } else {
        (
            BigDecimal::zero(),
            material_no_vat.clone(),
            work_no_vat.clone(),
            total_no_vat.clone(),
        )
    };

    LineResult {
        unit_price_of_material: base.unit_material_price.clone(),
        unit_price_of_work: base.unit_work_price.clone(),
        unit_price_of_materials_and_works: unit_both,
        price_for_all_material_without_vat: material_no_vat,
        price_for_all_work_without_vat: work_no_vat,
        total_price_without_vat: total_no_vat,
        vat_amount,
        price_for_all_material: material,
        price_for_all_work: work,
        total_price: total,
    }
}

/// 单行计算服务
pub struct LineCalculator {
    pricer: Arc<CardPricer>,
}

impl LineCalculator {
    pub fn new(pricer: Arc<CardPricer>) -> Self {
        Self { pricer }
    }

    /// 计价器的 NotFound / InvalidInput 原样传播
    pub fn calculate_line(
        &self,
        card_id: i64,
        quantity: &BigDecimal,
        overhead: &OverheadContext,
        vat: &VatConfig,
    ) -> EngineResult<LineResult> {
        let base = self.pricer.price_card(card_id, quantity)?;
        Ok(assemble_line(&base, overhead, vat))
    }
}
