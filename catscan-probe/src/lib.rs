//! Client side of CatScan discovery and ingestion, for checking a desktop
//! bridge from the command line.

pub mod client;
pub mod discover;
