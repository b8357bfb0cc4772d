//! Content requests and the identifiers derived from them.
//!
//! A [`ContentRequest`] names one playable item (a movie, or one episode of a
//! series) by its external IMDb-style id. Once the metadata collaborator has
//! translated that id into a provider-specific [`ResolvedId`], the pair is
//! turned into an [`ExtractionTarget`], which is what every source's URL
//! template consumes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Kind of content being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
}

impl MediaType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "movie" => Ok(MediaType::Movie),
            "series" | "tv" => Ok(MediaType::Series),
            other => Err(RequestError::UnknownMediaType(other.to_string())),
        }
    }
}

/// Season and episode numbers of a series request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Episode {
    pub season: u32,
    pub episode: u32,
}

/// One logical lookup: a movie, or a single episode of a series.
///
/// Fields are private so the "season/episode iff series" rule cannot be
/// broken after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentRequest {
    media_type: MediaType,
    external_id: String,
    episode: Option<Episode>,
}

impl ContentRequest {
    /// Request for a movie.
    pub fn movie(external_id: impl Into<String>) -> Result<Self, RequestError> {
        let external_id = validate_external_id(external_id.into())?;
        Ok(Self {
            media_type: MediaType::Movie,
            external_id,
            episode: None,
        })
    }

    /// Request for one episode of a series.
    pub fn episode(
        external_id: impl Into<String>,
        season: u32,
        episode: u32,
    ) -> Result<Self, RequestError> {
        let external_id = validate_external_id(external_id.into())?;
        Ok(Self {
            media_type: MediaType::Series,
            external_id,
            episode: Some(Episode { season, episode }),
        })
    }

    /// Parse the addon-style stream id.
    ///
    /// Movies use `tt1234567` (anything after the first `:` is ignored),
    /// series use `tt1234567:<season>:<episode>`.
    pub fn from_stream_id(media_type: MediaType, id: &str) -> Result<Self, RequestError> {
        let mut parts = id.split(':');
        let external_id = parts.next().unwrap_or_default();

        match media_type {
            MediaType::Movie => Self::movie(external_id),
            MediaType::Series => {
                let season = parse_number(parts.next(), "season", id)?;
                let episode = parse_number(parts.next(), "episode", id)?;
                Self::episode(external_id, season, episode)
            }
        }
    }

    #[must_use]
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    #[must_use]
    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    /// Season/episode, present exactly when this is a series request.
    #[must_use]
    pub fn episode_numbers(&self) -> Option<Episode> {
        self.episode
    }

    /// Cache key: `movie:<id>` or `series:<id>:<season>:<episode>`.
    #[must_use]
    pub fn content_key(&self) -> String {
        match self.episode {
            None => format!("movie:{}", self.external_id),
            Some(Episode { season, episode }) => {
                format!("series:{}:{season}:{episode}", self.external_id)
            }
        }
    }

    /// Pair this request with the provider id resolved for it.
    #[must_use]
    pub fn target(&self, id: ResolvedId) -> ExtractionTarget {
        ExtractionTarget {
            media_type: self.media_type,
            id,
            episode: self.episode,
        }
    }
}

impl fmt::Display for ContentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.episode {
            None => write!(f, "movie {}", self.external_id),
            Some(Episode { season, episode }) => {
                write!(f, "series {} S{season}E{episode}", self.external_id)
            }
        }
    }
}

/// Provider-specific numeric id (a TMDB id) for an external id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedId(pub u64);

impl fmt::Display for ResolvedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a source URL template needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtractionTarget {
    pub media_type: MediaType,
    pub id: ResolvedId,
    pub episode: Option<Episode>,
}

fn validate_external_id(id: String) -> Result<String, RequestError> {
    let digits = id.strip_prefix("tt").unwrap_or_default();
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Ok(id)
    } else {
        Err(RequestError::InvalidExternalId(id))
    }
}

fn parse_number(part: Option<&str>, field: &'static str, id: &str) -> Result<u32, RequestError> {
    part.and_then(|p| p.parse().ok())
        .ok_or_else(|| RequestError::MissingEpisode {
            field,
            id: id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movie_content_key() {
        let request = ContentRequest::movie("tt0111161").unwrap();
        assert_eq!(request.content_key(), "movie:tt0111161");
        assert_eq!(request.media_type(), MediaType::Movie);
        assert!(request.episode_numbers().is_none());
    }

    #[test]
    fn series_content_key() {
        let request = ContentRequest::episode("tt0903747", 2, 5).unwrap();
        assert_eq!(request.content_key(), "series:tt0903747:2:5");
        assert_eq!(
            request.episode_numbers(),
            Some(Episode {
                season: 2,
                episode: 5
            })
        );
    }

    #[test]
    fn rejects_ids_without_tt_prefix() {
        assert!(matches!(
            ContentRequest::movie("278"),
            Err(RequestError::InvalidExternalId(_))
        ));
        assert!(ContentRequest::movie("tt").is_err());
        assert!(ContentRequest::movie("tt12ab").is_err());
    }

    #[test]
    fn stream_id_for_movie_ignores_suffix() {
        let request = ContentRequest::from_stream_id(MediaType::Movie, "tt0111161:1:1").unwrap();
        assert_eq!(request.external_id(), "tt0111161");
        assert_eq!(request.media_type(), MediaType::Movie);
    }

    #[test]
    fn stream_id_for_series() {
        let request = ContentRequest::from_stream_id(MediaType::Series, "tt0903747:1:3").unwrap();
        assert_eq!(request.content_key(), "series:tt0903747:1:3");
    }

    #[test]
    fn stream_id_for_series_requires_episode() {
        let err = ContentRequest::from_stream_id(MediaType::Series, "tt0903747:1").unwrap_err();
        assert!(matches!(
            err,
            RequestError::MissingEpisode {
                field: "episode",
                ..
            }
        ));
        assert!(ContentRequest::from_stream_id(MediaType::Series, "tt0903747").is_err());
        assert!(ContentRequest::from_stream_id(MediaType::Series, "tt0903747:x:1").is_err());
    }

    #[test]
    fn media_type_parsing() {
        assert_eq!("movie".parse::<MediaType>().unwrap(), MediaType::Movie);
        assert_eq!("Series".parse::<MediaType>().unwrap(), MediaType::Series);
        assert_eq!("tv".parse::<MediaType>().unwrap(), MediaType::Series);
        assert!("channel".parse::<MediaType>().is_err());
    }

    #[test]
    fn target_carries_episode() {
        let request = ContentRequest::episode("tt0903747", 3, 7).unwrap();
        let target = request.target(ResolvedId(1396));
        assert_eq!(target.media_type, MediaType::Series);
        assert_eq!(target.id, ResolvedId(1396));
        assert_eq!(target.episode.map(|e| e.episode), Some(7));
    }
}
