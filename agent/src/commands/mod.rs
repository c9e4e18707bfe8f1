pub mod config;
pub mod deployment;
pub mod run;
pub mod safe_mode;
pub mod status;
