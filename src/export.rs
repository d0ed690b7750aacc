use crate::models::{round_money, MetricKey};
use crate::service::{PricedEstimate, SectionTotalView};
use bigdecimal::BigDecimal;
use csv::Writer;
use std::io::Write;

fn option_to_csv(val: Option<&BigDecimal>) -> String {
    val.map(|v| round_money(v).to_string()).unwrap_or_default()
}

/// 导出逐行计价结果, 失败行写入错误文本
pub fn write_priced_rows<W: Write>(priced: &PricedEstimate, out: W) -> Result<W, csv::Error> {
    let mut writer = Writer::from_writer(out);

    let mut header = vec![
        "row_index".to_string(),
        "section".to_string(),
        "name".to_string(),
        "unit".to_string(),
        "quantity".to_string(),
        "card_id".to_string(),
    ];
    header.extend(MetricKey::ORDER.iter().map(|k| k.as_str().to_string()));
    header.push("error".to_string());
    writer.write_record(&header)?;

    for priced_row in &priced.rows {
        let row = &priced_row.row;
        let mut record = vec![
            row.row_index.to_string(),
            row.section_path.clone().unwrap_or_default(),
            row.name.clone(),
            row.unit.clone(),
            priced_row
                .mapping
                .as_ref()
                .map(|m| m.quantity.to_string())
                .unwrap_or_default(),
            priced_row
                .mapping
                .as_ref()
                .map(|m| m.card_id.to_string())
                .unwrap_or_default(),
        ];
        for key in MetricKey::ORDER {
            record.push(option_to_csv(priced_row.result.as_ref().map(|r| r.get(key))));
        }
        record.push(
            priced_row
                .error
                .as_ref()
                .map(|e| e.error.clone())
                .unwrap_or_default(),
        );
        writer.write_record(&record)?;
    }

    writer.flush()?;
    writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

/// 导出章节合计
pub fn write_section_totals<W: Write>(
    sections: &[SectionTotalView],
    out: W,
) -> Result<W, csv::Error> {
    let mut writer = Writer::from_writer(out);
    writer.write_record(["path", "material", "work", "total", "rows"])?;

    for s in sections {
        writer.write_record(&[
            s.path.clone(),
            s.material.to_string(),
            s.work.to_string(),
            s.total.to_string(),
            s.rows.to_string(),
        ])?;
    }

    writer.flush()?;
    writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{
        CardMarkups, Estimate, EstimateRow, ResourceLine, RowMapping, TechnicalCard,
        TechnicalCardVersion, VatConfig,
    };
    use crate::service::EstimateEngine;
    use crate::store::EstimateStore;
    use std::str::FromStr;
    use std::sync::Arc;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn priced() -> PricedEstimate {
        let store = Arc::new(EstimateStore::new());
        store.insert_card(TechnicalCard {
            id: 1,
            name: "Окраска".to_string(),
            unit: "м2".to_string(),
            markups: CardMarkups::default(),
            versions: vec![TechnicalCardVersion {
                id: 10,
                version: 1,
                is_published: true,
                materials: vec![ResourceLine::new(dec("1"), dec("10"))],
                works: vec![ResourceLine::new(dec("1"), dec("5"))],
            }],
        });
        let mut estimate = Estimate::new(1, "Смета", VatConfig::active(dec("20")));
        estimate.rows = vec![
            EstimateRow {
                row_index: 1,
                name: "Окраска стен".to_string(),
                unit: "м2".to_string(),
                section_path: Some("Отделка".to_string()),
            },
            EstimateRow {
                row_index: 2,
                name: "Неизвестно".to_string(),
                unit: "шт".to_string(),
                section_path: Some("Отделка".to_string()),
            },
        ];
        estimate.mappings = vec![
            RowMapping { row_index: 1, card_id: 1, quantity: dec("3") },
            RowMapping { row_index: 2, card_id: 404, quantity: dec("1") },
        ];
        store.insert_estimate(estimate);

        EstimateEngine::new(store, None, &EngineConfig::default())
            .price_estimate(1, None)
            .unwrap()
    }

    #[test]
    fn test_write_priced_rows() {
        let bytes = write_priced_rows(&priced(), Vec::new()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        let header = "row_index,section,name,unit,quantity,card_id,UNIT_PRICE_OF_MATERIAL";
        assert!(lines[0].starts_with(header));
        assert!(lines[0].ends_with("TOTAL_PRICE,error"));
        // 45 * 1.2 = 54
        let first = "1,Отделка,Окраска стен,м2,3,1,10.00,5.00,15.00,30.00,15.00,45.00,9.00,";
        assert!(lines[1].starts_with(first));
        assert!(lines[1].ends_with(",54.00,"));
        assert!(lines[2].starts_with("2,Отделка,Неизвестно,шт,1,404,,"));
        assert!(lines[2].ends_with("technical card 404 not found"));
    }

    #[test]
    fn test_write_section_totals() {
        let priced = priced();
        let bytes = write_section_totals(&priced.section_totals(), Vec::new()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "path,material,work,total,rows");
        assert_eq!(lines[1], ",36.00,18.00,54.00,1");
        assert_eq!(lines[2], "Отделка,36.00,18.00,54.00,1");
    }
}
