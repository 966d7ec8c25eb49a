pub mod config;
pub mod doctor;
pub mod report;
pub mod scanner;
pub mod scenario;
pub mod toolkit;

pub use config::*;
pub use doctor::*;
pub use report::*;
pub use scanner::*;
pub use toolkit::*;
