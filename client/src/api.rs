use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use shared::types::server_config::ApiConfig;
use shared::types::{
    ApiEnvelope, ContentFields, DeletedRef, EntityKind, FeaturedFields, FeaturedVideo, Highlight,
    HighlightFields, League, LeagueFields, Match, MatchFields, Record, UPDATE_ID_HEADER, UpdateId,
    Video, VideoFields,
};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    /// The request never produced a response (refused, reset, bad URL, ...).
    #[error("{method} {url} failed: {message}")]
    Connection {
        method: Method,
        url: String,
        message: String,
    },

    /// The server answered with an error envelope or a non-success status.
    #[error("server returned {status} {code}: {message}")]
    Server {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("could not decode {status} response from {url}: {message}")]
    Decode {
        status: StatusCode,
        url: String,
        message: String,
    },

    #[error("no admin token configured")]
    MissingToken,
}

impl ApiError {
    /// HTTP status of the failed call, when the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Server { status, .. } | Self::Decode { status, .. } => Some(*status),
            Self::Connection { .. } | Self::MissingToken => None,
        }
    }

    /// Error code from the server envelope, e.g. `VALIDATION_FAILED`.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Typed client for the content API. Reads go to the public surface,
/// writes to the admin surface with the bearer token and an update id.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
    admin_url: String,
    admin_token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            http: Client::builder(TokioExecutor::new()).build_http(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            admin_url: config.admin_base().trim_end_matches('/').to_string(),
            admin_token: config.admin_token.clone().filter(|t| !t.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub async fn get_matches(&self) -> ApiResult<Vec<Match>> {
        self.list::<MatchFields>().await
    }

    pub async fn get_leagues(&self) -> ApiResult<Vec<League>> {
        self.list::<LeagueFields>().await
    }

    pub async fn get_videos(&self) -> ApiResult<Vec<Video>> {
        self.list::<VideoFields>().await
    }

    pub async fn get_highlights(&self) -> ApiResult<Vec<Highlight>> {
        self.list::<HighlightFields>().await
    }

    pub async fn get_featured_video(&self) -> ApiResult<Option<FeaturedVideo>> {
        self.read("/api/featured").await
    }

    pub async fn list<F: ContentFields>(&self) -> ApiResult<Vec<Record<F>>> {
        self.read(&format!("/api/{}", F::KIND.collection())).await
    }

    pub async fn get<F: ContentFields>(&self, id: i64) -> ApiResult<Record<F>> {
        self.read(&format!("/api/{}/{}", F::KIND.collection(), id))
            .await
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    pub async fn create_match(&self, fields: &MatchFields, update_id: UpdateId) -> ApiResult<Match> {
        self.create(fields, update_id).await
    }

    pub async fn update_match(
        &self,
        id: i64,
        fields: &MatchFields,
        update_id: UpdateId,
    ) -> ApiResult<Match> {
        self.update(id, fields, update_id).await
    }

    pub async fn delete_match(&self, id: i64, update_id: UpdateId) -> ApiResult<DeletedRef> {
        self.delete(EntityKind::Match, id, update_id).await
    }

    pub async fn create_league(
        &self,
        fields: &LeagueFields,
        update_id: UpdateId,
    ) -> ApiResult<League> {
        self.create(fields, update_id).await
    }

    pub async fn update_league(
        &self,
        id: i64,
        fields: &LeagueFields,
        update_id: UpdateId,
    ) -> ApiResult<League> {
        self.update(id, fields, update_id).await
    }

    pub async fn delete_league(&self, id: i64, update_id: UpdateId) -> ApiResult<DeletedRef> {
        self.delete(EntityKind::League, id, update_id).await
    }

    pub async fn create_video(&self, fields: &VideoFields, update_id: UpdateId) -> ApiResult<Video> {
        self.create(fields, update_id).await
    }

    pub async fn update_video(
        &self,
        id: i64,
        fields: &VideoFields,
        update_id: UpdateId,
    ) -> ApiResult<Video> {
        self.update(id, fields, update_id).await
    }

    pub async fn delete_video(&self, id: i64, update_id: UpdateId) -> ApiResult<DeletedRef> {
        self.delete(EntityKind::Video, id, update_id).await
    }

    pub async fn create_highlight(
        &self,
        fields: &HighlightFields,
        update_id: UpdateId,
    ) -> ApiResult<Highlight> {
        self.create(fields, update_id).await
    }

    pub async fn update_highlight(
        &self,
        id: i64,
        fields: &HighlightFields,
        update_id: UpdateId,
    ) -> ApiResult<Highlight> {
        self.update(id, fields, update_id).await
    }

    pub async fn delete_highlight(&self, id: i64, update_id: UpdateId) -> ApiResult<DeletedRef> {
        self.delete(EntityKind::Highlight, id, update_id).await
    }

    pub async fn set_featured_video(
        &self,
        fields: &FeaturedFields,
        update_id: UpdateId,
    ) -> ApiResult<FeaturedVideo> {
        self.write(Method::PUT, "/admin/api/featured", Some(fields), update_id)
            .await
    }

    pub async fn clear_featured_video(&self, update_id: UpdateId) -> ApiResult<DeletedRef> {
        self.write::<(), _>(Method::DELETE, "/admin/api/featured", None, update_id)
            .await
    }

    pub async fn create<F: ContentFields>(
        &self,
        fields: &F,
        update_id: UpdateId,
    ) -> ApiResult<Record<F>> {
        let path = format!("/admin/api/{}", F::KIND.collection());
        self.write(Method::POST, &path, Some(fields), update_id).await
    }

    pub async fn update<F: ContentFields>(
        &self,
        id: i64,
        fields: &F,
        update_id: UpdateId,
    ) -> ApiResult<Record<F>> {
        let path = format!("/admin/api/{}/{}", F::KIND.collection(), id);
        self.write(Method::PUT, &path, Some(fields), update_id).await
    }

    pub async fn delete(
        &self,
        kind: EntityKind,
        id: i64,
        update_id: UpdateId,
    ) -> ApiResult<DeletedRef> {
        let path = format!("/admin/api/{}/{}", kind.collection(), id);
        self.write::<(), _>(Method::DELETE, &path, None, update_id)
            .await
    }

    // ── Update stream ────────────────────────────────────────────────────────

    /// Open `/api/updates` and return the streaming body once the server
    /// accepted the subscription.
    pub async fn open_update_stream(&self) -> ApiResult<Incoming> {
        let url = format!("{}/api/updates", self.base_url);
        let req = Request::builder()
            .method(Method::GET)
            .uri(&url)
            .header(ACCEPT, "text/event-stream")
            .body(Full::new(Bytes::new()))
            .map_err(|e| connection_error(&Method::GET, &url, e))?;

        let res = self
            .http
            .request(req)
            .await
            .map_err(|e| connection_error(&Method::GET, &url, e))?;

        if !res.status().is_success() {
            let status = res.status();
            return Err(match self.decode::<serde_json::Value>(&url, res).await {
                Err(e) => e,
                Ok(_) => ApiError::Server {
                    status,
                    code: "HTTP_ERROR".into(),
                    message: "update stream rejected".into(),
                },
            });
        }
        Ok(res.into_body())
    }

    // ── Plumbing ─────────────────────────────────────────────────────────────

    async fn read<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let req = Request::builder()
            .method(Method::GET)
            .uri(&url)
            .header(ACCEPT, "application/json")
            .body(Full::new(Bytes::new()))
            .map_err(|e| connection_error(&Method::GET, &url, e))?;
        self.execute(Method::GET, url, req).await
    }

    async fn write<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        update_id: UpdateId,
    ) -> ApiResult<T> {
        let token = self.admin_token.as_deref().ok_or(ApiError::MissingToken)?;
        let url = format!("{}{}", self.admin_url, path);

        let payload = match body {
            Some(body) => serde_json::to_vec(body).map_err(|e| connection_error(&method, &url, e))?,
            None => Vec::new(),
        };

        let req = Request::builder()
            .method(method.clone())
            .uri(&url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(UPDATE_ID_HEADER, update_id.to_string())
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| connection_error(&method, &url, e))?;
        self.execute(method, url, req).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        req: Request<Full<Bytes>>,
    ) -> ApiResult<T> {
        debug!("{} {}", method, url);
        let res = self
            .http
            .request(req)
            .await
            .map_err(|e| connection_error(&method, &url, e))?;
        self.decode(&url, res).await
    }

    async fn decode<T: DeserializeOwned>(&self, url: &str, res: Response<Incoming>) -> ApiResult<T> {
        let status = res.status();
        let bytes = res
            .into_body()
            .collect()
            .await
            .map_err(|e| connection_error(&Method::GET, url, e))?
            .to_bytes();

        match serde_json::from_slice::<ApiEnvelope<T>>(&bytes) {
            Ok(ApiEnvelope::Success { data }) if status.is_success() => Ok(data),
            Ok(ApiEnvelope::Success { .. }) => Err(ApiError::Decode {
                status,
                url: url.to_string(),
                message: "success envelope on an error status".into(),
            }),
            Ok(ApiEnvelope::Error { code, message }) => {
                warn!("{} answered {} {}: {}", url, status, code, message);
                Err(ApiError::Server {
                    status,
                    code,
                    message,
                })
            }
            // Bodies from outside the router (e.g. an empty 408).
            Err(_) if !status.is_success() => Err(ApiError::Server {
                status,
                code: "HTTP_ERROR".into(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            }),
            Err(e) => Err(ApiError::Decode {
                status,
                url: url.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

fn connection_error(method: &Method, url: &str, e: impl std::fmt::Display) -> ApiError {
    ApiError::Connection {
        method: method.clone(),
        url: url.to_string(),
        message: e.to_string(),
    }
}
