pub mod balancer;
pub mod config;
pub mod database;
pub mod error;
pub mod forwarder;
pub mod heartbeat;
pub mod models;
pub mod node_metrics;
pub mod registry;
pub mod routes;
pub mod selector;
pub mod store;
pub mod task_tracker;
