#[macro_use]
extern crate log;

mod dissector;
pub use dissector::*;

pub mod dissectors;

mod engine;
pub use engine::*;

mod error;
pub use error::*;

mod layer;
pub use layer::Layer;

mod meta;
pub use meta::*;

mod registry;
pub use registry::*;

mod tree;
pub use tree::*;

pub use libwirecrab_tools::Config;
