pub mod detector;
pub mod distance;

pub use detector::*;
pub use distance::{ks_test, population_stability_index, wasserstein_distance};
