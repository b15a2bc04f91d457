pub mod alpha;
pub mod learner;
pub mod persist;
pub mod stats;
pub mod tree;
pub mod validation;

pub use alpha::*;
pub use learner::*;
pub use persist::ModelArtifact;
pub use validation::*;
