//! Browser-driven crawler that inventories interactive elements and API traffic

pub mod analytics;
pub mod browser;
pub mod cli;
pub mod crawler;
pub mod storage;
pub mod utils;
