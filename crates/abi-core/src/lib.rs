pub mod adjust;
pub mod aggregate;
pub mod classify;
pub mod delta;
pub mod error;
pub mod fallback;
pub mod filter;
pub mod parse;
pub mod result;
pub mod symbol;
pub mod verdict;
pub mod version;

pub use adjust::*;
pub use aggregate::*;
pub use classify::*;
pub use delta::*;
pub use error::*;
pub use fallback::*;
pub use filter::*;
pub use parse::*;
pub use result::*;
pub use symbol::*;
pub use verdict::*;
pub use version::*;
