pub mod config;
pub mod report;
pub mod serve;
pub mod summary;
