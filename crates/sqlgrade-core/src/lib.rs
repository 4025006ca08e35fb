pub mod audit;
pub mod chatbot;
pub mod config;
pub mod dataset;
pub mod db;
pub mod embeddings;
pub mod engine;
pub mod errors;
pub mod model;
pub mod report;
pub mod similarity;
pub mod storage;
