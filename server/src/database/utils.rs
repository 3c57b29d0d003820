use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// True for sqlite URLs that never touch disk. Every pooled connection to
/// such a URL would see its own empty database, so the pool is pinned to one.
pub fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Serialize a kind's fields into the JSON stored in `content.body`.
pub fn to_body<F: Serialize>(fields: &F) -> sqlx::Result<Value> {
    serde_json::to_value(fields).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

pub fn parse_body(raw: &str) -> sqlx::Result<Value> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub fn from_body<F: DeserializeOwned>(body: Value) -> sqlx::Result<F> {
    serde_json::from_value(body).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_are_detected() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://file:content?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite://content.db"));
    }
}
