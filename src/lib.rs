pub mod capture;
pub mod config;
pub mod frame;
pub mod handoff;
pub mod output;
pub mod settings;
pub mod shader;
pub mod utils;
pub mod worker;
