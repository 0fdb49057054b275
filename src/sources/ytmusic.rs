use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::core::text::pick_year;
use crate::models::{CanonicalEntity, CatalogCandidate, EntityKind, Service};
use crate::sources::{http_client, or_empty, CatalogSource};

const SEARCH_URL: &str = "https://music.youtube.com/youtubei/v1/search?prettyPrint=false";
const CLIENT_NAME: &str = "WEB_REMIX";
const CLIENT_VERSION: &str = "1.20240918.01.00";
const SONGS_FILTER: &str = "EgWKAQIIAWoMEA4QChADEAQQCRAF";
const ALBUMS_FILTER: &str = "EgWKAQIYAWoMEA4QChADEAQQCRAF";
const ARTIST_PAGE: &str = "MUSIC_PAGE_TYPE_ARTIST";
const ALBUM_PAGE: &str = "MUSIC_PAGE_TYPE_ALBUM";
const RENDERER_KEY: &str = "musicResponsiveListItemRenderer";

/// Type labels in the subtitle column, never artist names.
const TYPE_LABELS: [&str; 10] = [
    "song", "album", "single", "ep", "video", "песня", "альбом", "сингл", "трек", "видео",
];

/// YouTube Music through the InnerTube web API. Search only: ids in links
/// are opaque, so there is nothing to look up directly.
pub struct YtMusicClient {
    client: reqwest::blocking::Client,
    cookie: Option<String>,
    authorization: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListItem {
    #[serde(default)]
    flex_columns: Vec<FlexColumn>,
    playlist_item_data: Option<PlaylistItemData>,
    navigation_endpoint: Option<NavigationEndpoint>,
    thumbnail: Option<ThumbnailBox>,
}

#[derive(Deserialize)]
struct FlexColumn {
    #[serde(rename = "musicResponsiveListItemFlexColumnRenderer")]
    renderer: Option<FlexRenderer>,
}

#[derive(Deserialize)]
struct FlexRenderer {
    text: Option<Runs>,
}

#[derive(Deserialize)]
struct Runs {
    #[serde(default)]
    runs: Vec<Run>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Run {
    #[serde(default)]
    text: String,
    navigation_endpoint: Option<NavigationEndpoint>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemData {
    video_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigationEndpoint {
    browse_endpoint: Option<BrowseEndpoint>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrowseEndpoint {
    browse_id: Option<String>,
    browse_endpoint_context_supported_configs: Option<BrowseConfigs>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrowseConfigs {
    browse_endpoint_context_music_config: Option<MusicConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MusicConfig {
    page_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThumbnailBox {
    music_thumbnail_renderer: Option<ThumbnailRenderer>,
}

#[derive(Deserialize)]
struct ThumbnailRenderer {
    thumbnail: Option<Thumbnails>,
}

#[derive(Deserialize)]
struct Thumbnails {
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

impl Run {
    fn browse(&self) -> Option<&BrowseEndpoint> {
        self.navigation_endpoint.as_ref()?.browse_endpoint.as_ref()
    }

    fn page_type(&self) -> Option<&str> {
        self.browse()?
            .browse_endpoint_context_supported_configs
            .as_ref()?
            .browse_endpoint_context_music_config
            .as_ref()?
            .page_type
            .as_deref()
    }

    fn is_separator(&self) -> bool {
        let t = self.text.trim();
        t.is_empty() || t == "•" || t == "&" || t == ","
    }
}

impl ListItem {
    fn runs(&self) -> impl Iterator<Item = &Run> {
        self.flex_columns
            .iter()
            .filter_map(|c| c.renderer.as_ref()?.text.as_ref())
            .flat_map(|r| r.runs.iter())
    }

    fn title(&self) -> Option<String> {
        let first = self.flex_columns.first()?.renderer.as_ref()?.text.as_ref()?;
        first
            .runs
            .iter()
            .map(|r| r.text.trim())
            .find(|t| !t.is_empty())
            .map(str::to_string)
    }

    /// Runs after the title column, separators dropped.
    fn subtitle_runs(&self) -> Vec<&Run> {
        self.flex_columns
            .iter()
            .skip(1)
            .filter_map(|c| c.renderer.as_ref()?.text.as_ref())
            .flat_map(|r| r.runs.iter())
            .filter(|r| !r.is_separator())
            .collect()
    }

    fn artists(&self) -> Vec<String> {
        let linked: Vec<String> = self
            .runs()
            .filter(|r| r.page_type() == Some(ARTIST_PAGE))
            .map(|r| r.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if !linked.is_empty() {
            return linked;
        }
        // Unlinked artists: first plain subtitle run that is not a label,
        // a year or a duration.
        self.subtitle_runs()
            .into_iter()
            .filter(|r| r.page_type().is_none())
            .map(|r| r.text.trim())
            .find(|t| {
                !TYPE_LABELS.contains(&t.to_lowercase().as_str())
                    && pick_year([*t]).is_none()
                    && !t.contains(':')
            })
            .map(|t| vec![t.to_string()])
            .unwrap_or_default()
    }

    fn album_run(&self) -> Option<&Run> {
        self.runs().find(|r| r.page_type() == Some(ALBUM_PAGE))
    }

    fn year(&self) -> Option<String> {
        pick_year(self.subtitle_runs().into_iter().map(|r| r.text.as_str()))
    }

    fn cover(&self) -> Option<String> {
        self.thumbnail
            .as_ref()?
            .music_thumbnail_renderer
            .as_ref()?
            .thumbnail
            .as_ref()?
            .thumbnails
            .last()
            .map(|t| t.url.clone())
    }

    fn own_browse_id(&self) -> Option<String> {
        self.navigation_endpoint
            .as_ref()?
            .browse_endpoint
            .as_ref()?
            .browse_id
            .clone()
    }
}

impl YtMusicClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = http_client(config, config.proxy_for(Service::Ytmusic))
            .context("YouTube Music: не удалось создать HTTP-клиент")?;
        let non_empty = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        Ok(Self {
            client,
            cookie: non_empty(&config.ytmusic.cookie),
            authorization: non_empty(&config.ytmusic.authorization),
        })
    }

    fn search_raw(&self, query: &str, kind: EntityKind) -> Result<Value> {
        let filter = if kind.is_album() { ALBUMS_FILTER } else { SONGS_FILTER };
        let body = json!({
            "context": {
                "client": {
                    "clientName": CLIENT_NAME,
                    "clientVersion": CLIENT_VERSION,
                    "hl": "ru",
                    "gl": "RU",
                }
            },
            "query": query,
            "params": filter,
        });

        let mut request = self
            .client
            .post(SEARCH_URL)
            .header("Origin", "https://music.youtube.com")
            .header("X-Origin", "https://music.youtube.com")
            .json(&body);
        if let Some(cookie) = &self.cookie {
            request = request.header("Cookie", cookie);
        }
        if let Some(auth) = &self.authorization {
            request = request.header("Authorization", auth);
        }

        let value = request
            .send()
            .context("YouTube Music: поиск не удался")?
            .error_for_status()
            .context("YouTube Music: поиск вернул ошибку")?
            .json()
            .context("YouTube Music: не удалось разобрать ответ")?;
        Ok(value)
    }
}

impl CatalogSource for YtMusicClient {
    fn service(&self) -> Service {
        Service::Ytmusic
    }

    fn search(&self, query: &str, kind: EntityKind) -> Vec<CatalogCandidate> {
        let value = or_empty(Service::Ytmusic, "поиск", self.search_raw(query, kind));
        parse_results(&value, kind)
    }

    fn lookup(&self, _entity: &CanonicalEntity) -> Option<CatalogCandidate> {
        None
    }
}

fn collect_renderers<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == RENDERER_KEY {
                    out.push(child);
                } else {
                    collect_renderers(child, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_renderers(v, out)),
        _ => {}
    }
}

fn parse_results(value: &Value, kind: EntityKind) -> Vec<CatalogCandidate> {
    let mut renderers = Vec::new();
    collect_renderers(value, &mut renderers);
    renderers
        .into_iter()
        .filter_map(|raw| match ListItem::deserialize(raw) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!("YouTube Music: пропускаю элемент: {}", e);
                None
            }
        })
        .filter_map(|item| convert_item(&item, kind))
        .collect()
}

fn convert_item(item: &ListItem, kind: EntityKind) -> Option<CatalogCandidate> {
    let title = item.title()?;
    let album_run = item.album_run();
    let album_browse = album_run.and_then(|r| r.browse()?.browse_id.clone());

    if kind.is_album() {
        let id = item.own_browse_id().or(album_browse)?;
        let url = browse_url(&id);
        return Some(CatalogCandidate {
            id: Some(id.clone()),
            title: Some(title.clone()),
            artists: item.artists(),
            album: Some(title),
            album_id: Some(id),
            year: item.year(),
            cover: item.cover(),
            url: Some(url.clone()),
            album_url: Some(url),
        });
    }

    let video_id = item.playlist_item_data.as_ref()?.video_id.clone()?;
    Some(CatalogCandidate {
        url: Some(watch_url(&video_id)),
        album_url: album_browse.as_deref().map(browse_url),
        id: Some(video_id),
        title: Some(title),
        artists: item.artists(),
        album: album_run.map(|r| r.text.trim().to_string()),
        album_id: album_browse,
        year: item.year(),
        cover: item.cover(),
    })
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://music.youtube.com/watch?v={}", video_id)
}

pub fn browse_url(browse_id: &str) -> String {
    format!("https://music.youtube.com/browse/{}", browse_id)
}
