pub mod cli;
pub mod config;
pub mod discovery;
pub mod executor;
pub mod job;
pub mod report;
pub mod routines;
pub mod runner;
pub mod templates;
pub mod util;
