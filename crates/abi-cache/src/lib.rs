pub mod digest;
pub mod key;
pub mod store;

pub use digest::*;
pub use key::*;
pub use store::*;
