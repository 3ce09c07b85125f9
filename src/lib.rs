//! eTariff harvest - batch harvester for tariff XML exports.
//!
//! Two phases share one authenticated session: a browser-driven pagination
//! walk discovers every export identifier on the grid, then a plain HTTP
//! download engine turns each identifier into a saved XML file.

pub mod browser;
pub mod cli;
pub mod config;
pub mod download;
pub mod models;
pub mod rate_limit;
pub mod session;
pub mod storage;
pub mod transport;
pub mod walker;
