pub mod pair_model;
pub mod series;
pub mod stats;

pub use pair_model::{HedgeMode, PairModel, PairModelConfig, PairPoint};
pub use series::{parse_timestamp, TimeIndexed};
