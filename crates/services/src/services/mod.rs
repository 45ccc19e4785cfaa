pub mod agent;
pub mod config;
pub mod events;
pub mod git;
pub mod index;
pub mod memory;
pub mod model_router;
pub mod patch;
pub mod scope;
