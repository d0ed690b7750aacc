pub mod batch;
pub mod card_pricer;
pub mod engine;
pub mod estimate_admin;
pub mod line_calc;
pub mod overhead_context;
pub mod section_tree;

pub use batch::{split_raw_items, BatchCalculator, BatchItem, RawBatchItem};
pub use card_pricer::{parse_quantity, CardPricer};
pub use engine::{
    EstimateAnalysis, EstimateEngine, PricedEstimate, PricedRow, SectionTotalView, TopPosition,
};
pub use estimate_admin::{ContainerUpdate, EstimateAdminService, OverheadLinkView, OverheadListing};
pub use line_calc::{assemble_line, LineCalculator};
pub use overhead_context::{compute_context, OverheadContextResolver, PricingContext};
pub use section_tree::{SectionInput, SectionTree, TreeNode, TreeTotals};
