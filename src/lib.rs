pub mod app;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod conversion;
pub mod evaluation;
pub mod metadata;
pub mod orchestration;
pub mod protocol;
pub mod session;
pub mod shared;
