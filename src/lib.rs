pub mod api;
pub mod clients;
pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod listener;
pub mod models;
pub mod pipeline;
pub mod reference;
pub mod registry;
pub mod replay;
pub mod responder;
pub mod telemetry;
pub mod utils;
pub mod worker;
