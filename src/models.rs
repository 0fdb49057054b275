use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Streaming services a link can point to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Yandex,
    Vk,
    Mts,
    Zvuk,
    Spotify,
    Ytmusic,
    Shazam,
    Apple,
    Unknown,
}

impl Service {
    /// Every real service, in display order.
    pub const ALL: [Service; 8] = [
        Service::Yandex,
        Service::Vk,
        Service::Mts,
        Service::Zvuk,
        Service::Spotify,
        Service::Ytmusic,
        Service::Shazam,
        Service::Apple,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Yandex => "yandex",
            Service::Vk => "vk",
            Service::Mts => "mts",
            Service::Zvuk => "zvuk",
            Service::Spotify => "spotify",
            Service::Ytmusic => "ytmusic",
            Service::Shazam => "shazam",
            Service::Apple => "apple",
            Service::Unknown => "unknown",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Service::Yandex => "Яндекс Музыка",
            Service::Vk => "VK Музыка",
            Service::Mts => "МТС Музыка",
            Service::Zvuk => "Звук",
            Service::Spotify => "Spotify",
            Service::Ytmusic => "YouTube Music",
            Service::Shazam => "Shazam",
            Service::Apple => "Apple Music",
            Service::Unknown => "неизвестно",
        }
    }

    /// The service whose numeric catalog ids coincide with this one.
    pub fn shared_catalog_partner(&self) -> Option<Service> {
        match self {
            Service::Yandex => Some(Service::Mts),
            Service::Mts => Some(Service::Yandex),
            _ => None,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Track,
    Album,
    #[default]
    Unknown,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Track => "track",
            EntityKind::Album => "album",
            EntityKind::Unknown => "unknown",
        }
    }

    pub fn is_album(&self) -> bool {
        matches!(self, EntityKind::Album)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A track or album identified independently of the URL shape it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalEntity {
    pub service: Service,
    pub kind: EntityKind,
    pub track_id: Option<String>,
    pub album_id: Option<String>,
    pub access_key: Option<String>,
}

impl Default for CanonicalEntity {
    fn default() -> Self {
        Self {
            service: Service::Unknown,
            kind: EntityKind::Unknown,
            track_id: None,
            album_id: None,
            access_key: None,
        }
    }
}

impl CanonicalEntity {
    pub fn has_ids(&self) -> bool {
        self.track_id.is_some() || self.album_id.is_some()
    }

    /// The same ids viewed as an entity of another service.
    pub fn retarget(&self, service: Service) -> CanonicalEntity {
        CanonicalEntity {
            service,
            access_key: None,
            ..self.clone()
        }
    }
}

/// Cross-link state of one service within a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Unresolved,
    NotFound,
    Found(String),
}

impl LinkState {
    pub fn url(&self) -> Option<&str> {
        match self {
            LinkState::Found(url) => Some(url),
            _ => None,
        }
    }

    /// Whether the service was already searched (found or not).
    pub fn is_settled(&self) -> bool {
        !matches!(self, LinkState::Unresolved)
    }

    /// `null` when never attempted, `false` when searched without a match.
    pub fn to_json(&self) -> Value {
        match self {
            LinkState::Unresolved => Value::Null,
            LinkState::NotFound => Value::Bool(false),
            LinkState::Found(url) => Value::String(url.clone()),
        }
    }
}

/// One entry of a foreign catalog, as returned by a search or lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogCandidate {
    pub id: Option<String>,
    pub title: Option<String>,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub album_id: Option<String>,
    pub year: Option<String>,
    pub cover: Option<String>,
    pub url: Option<String>,
    pub album_url: Option<String>,
}

impl CatalogCandidate {
    pub fn artist_line(&self) -> Option<String> {
        let names: Vec<&str> = self
            .artists
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(names.join(", "))
        }
    }

    /// The candidate's parent album as an album-shaped candidate.
    pub fn parent_album(&self) -> Option<CatalogCandidate> {
        let album = self.album.clone()?;
        Some(CatalogCandidate {
            id: self.album_id.clone(),
            title: Some(album.clone()),
            artists: self.artists.clone(),
            album: Some(album),
            album_id: self.album_id.clone(),
            year: self.year.clone(),
            cover: self.cover.clone(),
            url: self.album_url.clone(),
            album_url: self.album_url.clone(),
        })
    }

    pub fn to_fragment(&self, kind: EntityKind) -> MetaFragment {
        let album = if kind.is_album() {
            self.title.clone().or_else(|| self.album.clone())
        } else {
            self.album.clone()
        };
        MetaFragment {
            title: self.title.clone(),
            album,
            artist: self.artist_line(),
            year: self.year.clone(),
            image: self.cover.clone(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} - {} [{}]",
            self.artist_line().as_deref().unwrap_or("?"),
            self.title.as_deref().unwrap_or("?"),
            self.album.as_deref().unwrap_or("?")
        )
    }
}

/// Partial metadata folded into a record by the merge engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaFragment {
    pub title: Option<String>,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub year: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataRecord {
    pub title: Option<String>,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub year: Option<String>,
    pub image: Option<String>,
    pub source_url: String,
    pub resolved_url: String,
    pub entity: CanonicalEntity,
    pub links: BTreeMap<Service, LinkState>,
    pub raw_tags: BTreeMap<String, String>,
}

impl MetadataRecord {
    pub fn link(&self, service: Service) -> &LinkState {
        static UNRESOLVED: LinkState = LinkState::Unresolved;
        self.links.get(&service).unwrap_or(&UNRESOLVED)
    }

    pub fn set_link(&mut self, service: Service, state: LinkState) {
        self.links.insert(service, state);
    }

    /// Title used to query foreign catalogs: album name for albums.
    pub fn base_title(&self) -> Option<&str> {
        let album = self.album.as_deref().filter(|a| !a.trim().is_empty());
        let title = self.title.as_deref().filter(|t| !t.trim().is_empty());
        if self.entity.kind.is_album() {
            album.or(title)
        } else {
            title.or(album)
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("неизвестно")
    }

    pub fn display_artist(&self) -> &str {
        self.artist.as_deref().unwrap_or("неизвестно")
    }

    pub fn summary(&self) -> String {
        format!(
            "{} - {} [{}]",
            self.display_artist(),
            self.display_title(),
            self.album.as_deref().unwrap_or("неизвестно")
        )
    }

    /// Flat key/value form used for JSON output.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("title".into(), json!(self.title));
        map.insert("album".into(), json!(self.album));
        map.insert("artist".into(), json!(self.artist));
        map.insert("year".into(), json!(self.year));
        map.insert("image".into(), json!(self.image));
        map.insert("source_url".into(), json!(self.source_url));
        map.insert("resolved_url".into(), json!(self.resolved_url));
        map.insert("service".into(), json!(self.entity.service));
        map.insert("kind".into(), json!(self.entity.kind));
        map.insert("track_id".into(), json!(self.entity.track_id));
        map.insert("album_id".into(), json!(self.entity.album_id));
        map.insert("access_key".into(), json!(self.entity.access_key));
        for service in Service::ALL {
            map.insert(
                format!("{}_url", service.as_str()),
                self.link(service).to_json(),
            );
        }
        map.insert("raw".into(), json!(self.raw_tags));
        Value::Object(map)
    }
}
