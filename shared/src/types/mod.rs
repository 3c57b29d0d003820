pub mod content;
pub mod json_error;
pub mod server_config;
pub mod update;

pub use self::content::*;
pub use self::json_error::{ApiEnvelope, ErrorResponse};
pub use self::server_config::{AppConfig, ClientConfig, ConfigError};
pub use self::update::{
    EntityKind, UPDATE_EVENT, UPDATE_ID_HEADER, UpdateAction, UpdateEvent, UpdateId, now_millis,
};
