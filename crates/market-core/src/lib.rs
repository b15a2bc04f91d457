pub mod error;
pub mod frame;
pub mod types;

pub use error::*;
pub use frame::*;
pub use types::*;
