#![allow(dead_code)]

pub mod harness;
pub mod http_utils;
pub mod logging;
pub mod mock_bridge;
pub mod net;
pub mod upstream;

pub use harness::*;
pub use http_utils::*;
pub use logging::*;
pub use mock_bridge::*;
pub use net::*;
pub use upstream::*;

pub const ONION_HOST: &str = "exampleabcdefghij1234.onion";
