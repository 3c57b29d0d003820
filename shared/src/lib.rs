//! Types, configuration and the realtime update core shared by the sports
//! content server and its clients.

pub mod config;
pub mod realtime;
pub mod types;
