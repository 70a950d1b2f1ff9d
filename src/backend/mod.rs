//! Backend module - external image generation APIs

pub mod fal;
pub mod traits;
