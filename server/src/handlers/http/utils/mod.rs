pub mod json_response;
pub mod request;

// Re-export commonly used utilities
pub use json_response::*;
pub use request::*;
