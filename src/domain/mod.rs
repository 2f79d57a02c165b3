//! Domain layer: records, rules and events, free of any platform calls.

pub mod category;
pub mod events;
pub mod fallback;
pub mod models;
pub mod settings;
