#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod io;
pub mod pipeline;
pub mod types;

#[path = "../timeline/mod.rs"]
pub mod timeline;

#[path = "../cascade/mod.rs"]
pub mod cascade;
