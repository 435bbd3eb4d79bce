pub mod checkpoint;
pub mod crawler;
pub mod notify;
pub mod orchestrator;
pub mod processor;
pub mod standardizer;
pub mod stats;
pub mod upsert;
