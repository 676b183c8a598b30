pub mod calibration;
pub mod region;
pub mod statistic;

pub use calibration::*;
pub use region::*;
pub use statistic::*;
