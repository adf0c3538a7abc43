pub mod controller;
pub mod logging;
pub mod stats;
pub mod types;
