//! Desktop side of CatScan: answers LAN discovery broadcasts, accepts scan
//! records over HTTP and pushes them to the local presentation layer.

pub mod api;
pub mod config;
pub mod discovery;
pub mod logging;
pub mod net;
pub mod push_bridge;
