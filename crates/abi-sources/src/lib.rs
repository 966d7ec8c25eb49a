pub mod apt;
pub mod archive;
pub mod conda;
pub mod discover;
pub mod headers;
pub mod local;
pub mod source;
pub mod spec;

pub use apt::*;
pub use archive::*;
pub use conda::*;
pub use discover::*;
pub use headers::*;
pub use local::*;
pub use source::*;
pub use spec::*;
