pub mod ports {
    pub mod bar_source;
    pub mod csv_bars;
    pub mod replay_bars;
    pub mod synthetic;
}
pub mod config;
pub mod driver;
pub mod error;
pub mod market;
pub mod model;
pub mod report;
pub mod risk;
pub mod strategy;
pub mod trade;
