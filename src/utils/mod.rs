pub mod cache;
pub mod scalar;
pub mod util;
