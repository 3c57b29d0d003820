pub mod content;
pub mod routes;
pub mod utils;
