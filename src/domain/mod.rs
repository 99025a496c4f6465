pub mod alerts;
pub mod apply;
pub mod cache;
pub mod derive;
pub mod entries;
pub mod event;
pub mod graph;
pub mod ids;
pub mod observer;
pub mod payload;
pub mod resolver;
pub mod resource;
pub mod service;
pub mod tally;
pub mod types;
