pub mod common;
pub mod list;
pub mod session;
pub mod status;
pub mod sync;
