pub mod audio;
pub mod cli;
pub mod config;
pub mod encode;
pub mod error;
pub mod export;
pub mod notes;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod source;
