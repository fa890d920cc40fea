pub mod config;
pub mod logger;
pub mod state;
pub mod upstream;
pub mod downstream;
