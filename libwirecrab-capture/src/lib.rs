//! Live capture pipeline: capture sources, external decoder output parsing, bounded
//! packet store and capture service

mod details;
mod error;
mod record;
mod service;
mod session;
mod settings;
mod source;
mod store;
pub mod stream;
pub mod tshark;

pub use details::*;
pub use error::*;
pub use record::*;
pub use service::*;
pub use session::*;
pub use settings::*;
pub use source::*;
pub use store::*;
