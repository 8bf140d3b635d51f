pub mod crtm_version;
pub mod firmware_blob;
pub mod handoff_table;
pub mod separator;
pub mod simple;

pub use crtm_version::*;
pub use firmware_blob::*;
pub use handoff_table::*;
pub use separator::*;
pub use simple::*;
