pub mod cxxfilt;
pub mod error;
pub mod libabigail;
pub mod nm;
pub mod process;
pub mod types;

pub use cxxfilt::*;
pub use error::*;
pub use libabigail::*;
pub use nm::*;
pub use process::*;
pub use types::*;
