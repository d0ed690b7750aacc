pub mod card;
pub mod estimate;
pub mod overhead;
pub mod result;

pub use card::{
    CardLineRow, CardMarkups, CardRow, CardVersionRow, ResourceLine, TechnicalCard,
    TechnicalCardVersion,
};
pub use estimate::{
    Estimate, EstimateHeaderRow, EstimateRow, EstimateRowRecord, RowMapping, RowMappingRecord,
    VatConfig,
};
pub use overhead::{
    EstimateOverheadCostLink, OverheadContext, OverheadCostContainer, OverheadLinkRecord,
    SnapshotDrift,
};
pub use result::{
    round_money, BaseCost, BatchOutcome, LineResult, LineView, MetricKey, NodeTotals, RowError,
    RowResult, MONEY_SCALE,
};
