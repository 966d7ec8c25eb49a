pub mod compatible;
pub mod engine;
pub mod rule;
pub mod types;

pub use compatible::*;
pub use engine::*;
pub use rule::*;
pub use types::*;
