#[macro_use]
extern crate log;

mod config;
mod duration;
mod error;
mod frame;
mod hexdump;
mod recording;

pub use config::Config;
pub use duration::{Duration, MICROS_PER_SEC};
pub use error::*;
pub use frame::RawFrame;
pub use hexdump::*;
pub use recording::*;

pub use pcap_parser;
pub use pcap_parser::Linktype;
