pub mod bar;
pub mod calendar;

pub use bar::{ensure_aligned, Bar, BarSeries, PriceField};
pub use calendar::{BarInterval, Calendar};
