use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::update::EntityKind;

// ---------------------------------------------------------------------------
// Record envelope
// ---------------------------------------------------------------------------

/// A stored content entity: server-assigned id and timestamps around the
/// editable fields. Serialises flat, e.g. `{"id":1,"title":..,"created_at":..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<F> {
    pub id: i64,
    #[serde(flatten)]
    pub fields: F,
    pub created_at: i64,
    pub updated_at: i64,
}

pub type Match = Record<MatchFields>;
pub type League = Record<LeagueFields>;
pub type Video = Record<VideoFields>;
pub type Highlight = Record<HighlightFields>;
pub type FeaturedVideo = Record<FeaturedFields>;

/// Body of a successful delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRef {
    pub id: i64,
}

/// Editable half of a content entity.
pub trait ContentFields:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    const KIND: EntityKind;

    fn validate(&self) -> Result<(), ValidationError>;
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must not be blank")]
    Blank(&'static str),

    #[error("{0} must be an http(s) URL")]
    InvalidUrl(&'static str),

    #[error("home_team and away_team must differ")]
    SameTeams,

    #[error("{0} must be set when {1} is set")]
    MissingPair(&'static str, &'static str),
}

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Blank(field));
    }
    Ok(())
}

fn require_url(field: &'static str, value: &str) -> Result<(), ValidationError> {
    require_text(field, value)?;
    let v = value.trim();
    if !(v.starts_with("http://") || v.starts_with("https://")) {
        return Err(ValidationError::InvalidUrl(field));
    }
    Ok(())
}

fn optional_url(field: &'static str, value: &Option<String>) -> Result<(), ValidationError> {
    match value {
        Some(v) => require_url(field, v),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Matches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    #[default]
    Scheduled,
    Live,
    Finished,
    Postponed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFields {
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub league_id: Option<i64>,
    /// Kick-off time, epoch milliseconds.
    pub kickoff: i64,
    #[serde(default)]
    pub status: MatchStatus,
    #[serde(default)]
    pub home_score: Option<u32>,
    #[serde(default)]
    pub away_score: Option<u32>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
}

impl ContentFields for MatchFields {
    const KIND: EntityKind = EntityKind::Match;

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("home_team", &self.home_team)?;
        require_text("away_team", &self.away_team)?;
        if self.home_team.trim().eq_ignore_ascii_case(self.away_team.trim()) {
            return Err(ValidationError::SameTeams);
        }
        match (self.home_score, self.away_score) {
            (Some(_), None) => return Err(ValidationError::MissingPair("away_score", "home_score")),
            (None, Some(_)) => return Err(ValidationError::MissingPair("home_score", "away_score")),
            _ => {}
        }
        optional_url("stream_url", &self.stream_url)
    }
}

// ---------------------------------------------------------------------------
// Leagues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueFields {
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    /// Maintained by the server as matches are created, moved and deleted.
    /// Whatever a client sends here is ignored.
    #[serde(default)]
    pub match_count: u32,
}

impl ContentFields for LeagueFields {
    const KIND: EntityKind = EntityKind::League;

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)?;
        optional_url("logo_url", &self.logo_url)
    }
}

// ---------------------------------------------------------------------------
// Videos
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFields {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub league_id: Option<i64>,
}

impl ContentFields for VideoFields {
    const KIND: EntityKind = EntityKind::Video;

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)?;
        require_url("url", &self.url)?;
        optional_url("thumbnail_url", &self.thumbnail_url)
    }
}

// ---------------------------------------------------------------------------
// Highlights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightFields {
    pub title: String,
    pub video_url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub match_id: Option<i64>,
}

impl ContentFields for HighlightFields {
    const KIND: EntityKind = EntityKind::Highlight;

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)?;
        require_url("video_url", &self.video_url)?;
        optional_url("thumbnail_url", &self.thumbnail_url)
    }
}

// ---------------------------------------------------------------------------
// Featured video (singleton)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturedFields {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Catalog video this feature points at, if any.
    #[serde(default)]
    pub video_id: Option<i64>,
}

impl ContentFields for FeaturedFields {
    const KIND: EntityKind = EntityKind::Featured;

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)?;
        require_url("url", &self.url)?;
        optional_url("thumbnail_url", &self.thumbnail_url)
    }
}
