pub mod artifact;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod evaluate;
pub mod features;
pub mod journal;
pub mod lifecycle;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod predict;
pub mod space;
pub mod tools;
pub mod trainer;
pub mod workspace;
