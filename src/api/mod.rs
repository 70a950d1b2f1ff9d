//! API module - HTTP surface in front of the dispatch core

pub mod handlers;
pub mod routes;
pub mod templates;
