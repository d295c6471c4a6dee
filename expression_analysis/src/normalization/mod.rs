//! Count normalization stages: GC-bias correction and library-size
//! scaling

pub mod gc;
pub mod size_factors;

pub use gc::within_lane_full_quantile;
pub use size_factors::{estimate_size_factors, normalize_counts};
