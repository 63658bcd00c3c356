#![forbid(unsafe_code)]

pub mod app;
pub mod bypass;
pub mod config;
pub mod constants;
pub mod entitlement;
pub mod error;
pub mod gate;
pub mod models;
pub mod observability;
pub mod registry;
pub mod resolver;
pub mod runtime;
