pub mod artifacts;
pub mod classify;
pub mod evaluation;
pub mod features;
pub mod inference;
pub mod ingestion;
pub mod normalize;
pub mod service;
pub mod summarize;
pub mod training;
