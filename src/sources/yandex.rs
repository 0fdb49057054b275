use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use crate::config::Config;
use crate::models::{CanonicalEntity, CatalogCandidate, EntityKind, Service};
use crate::sources::{
    artist_names, de_opt_id, de_opt_year, http_client, or_empty, CatalogSource, CredentialProvider,
};

const SEARCH_URL: &str = "https://music.yandex.ru/handlers/music-search.jsx";
const ALBUM_URL: &str = "https://music.yandex.ru/handlers/album.jsx";
const TRACK_URL: &str = "https://music.yandex.ru/handlers/track.jsx";
const API_BASE: &str = "https://api.music.yandex.net";
const COVER_SIZE: &str = "1000x1000";

/// Yandex Music: public web handlers for search and albums, the OAuth API
/// for tracks when a token is configured.
pub struct YandexClient {
    client: reqwest::blocking::Client,
    token: Option<String>,
}

#[derive(Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    tracks: Section<YmTrack>,
    #[serde(default)]
    albums: Section<YmAlbum>,
}

#[derive(Deserialize)]
struct Section<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

impl<T> Default for Section<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Deserialize)]
struct TracksResponse {
    #[serde(default)]
    result: Vec<YmTrack>,
}

#[derive(Deserialize)]
struct TrackHandlerResponse {
    track: Option<YmTrack>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct YmTrack {
    #[serde(default, deserialize_with = "de_opt_id")]
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    artists: Vec<YmArtist>,
    #[serde(default)]
    albums: Vec<YmAlbum>,
    #[serde(default, deserialize_with = "de_opt_year")]
    year: Option<String>,
    cover_uri: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct YmAlbum {
    #[serde(default, deserialize_with = "de_opt_id")]
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    artists: Vec<YmArtist>,
    #[serde(default, deserialize_with = "de_opt_year")]
    year: Option<String>,
    cover_uri: Option<String>,
}

#[derive(Deserialize)]
struct YmArtist {
    name: Option<String>,
}

impl YandexClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = http_client(config, config.proxy_for(Service::Yandex))
            .context("Яндекс: не удалось создать HTTP-клиент")?;
        Ok(Self {
            client,
            token: config.credential(Service::Yandex),
        })
    }

    fn search_all(&self, query: &str) -> Result<SearchResponse> {
        let resp = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("text", query),
                ("type", "all"),
                ("page", "0"),
                ("playlist-infinite", "true"),
            ])
            .send()
            .context("Яндекс: поиск не удался")?
            .error_for_status()
            .context("Яндекс: поиск вернул ошибку")?
            .json()
            .context("Яндекс: не удалось разобрать ответ поиска")?;
        Ok(resp)
    }

    fn fetch_album(&self, album_id: &str) -> Result<Option<YmAlbum>> {
        let album: YmAlbum = self
            .client
            .get(ALBUM_URL)
            .query(&[("album", album_id), ("lang", "ru")])
            .send()
            .context("Яндекс: запрос альбома не удался")?
            .error_for_status()
            .context("Яндекс: альбом не найден")?
            .json()
            .context("Яндекс: не удалось разобрать альбом")?;
        Ok(album.id.is_some().then_some(album))
    }

    fn fetch_track(&self, track_id: &str) -> Result<Option<YmTrack>> {
        match &self.token {
            Some(token) => {
                let resp: TracksResponse = self
                    .client
                    .get(format!("{}/tracks/{}", API_BASE, track_id))
                    .header("Authorization", format!("OAuth {}", token))
                    .query(&[("lang", "ru")])
                    .send()
                    .context("Яндекс API: запрос трека не удался")?
                    .error_for_status()
                    .context("Яндекс API: трек не найден")?
                    .json()
                    .context("Яндекс API: не удалось разобрать трек")?;
                Ok(resp.result.into_iter().next())
            }
            None => {
                let resp: TrackHandlerResponse = self
                    .client
                    .get(TRACK_URL)
                    .query(&[("track", track_id), ("lang", "ru")])
                    .send()
                    .context("Яндекс: запрос трека не удался")?
                    .error_for_status()
                    .context("Яндекс: трек не найден")?
                    .json()
                    .context("Яндекс: не удалось разобрать трек")?;
                Ok(resp.track)
            }
        }
    }
}

impl CatalogSource for YandexClient {
    fn service(&self) -> Service {
        Service::Yandex
    }

    fn search(&self, query: &str, kind: EntityKind) -> Vec<CatalogCandidate> {
        let resp = or_empty(Service::Yandex, "поиск", self.search_all(query));
        if kind.is_album() {
            resp.albums.items.iter().filter_map(convert_album).collect()
        } else {
            resp.tracks.items.iter().filter_map(convert_track).collect()
        }
    }

    fn lookup(&self, entity: &CanonicalEntity) -> Option<CatalogCandidate> {
        let wants_album = entity.kind.is_album() || entity.track_id.is_none();
        if wants_album {
            let album_id = entity.album_id.as_deref()?;
            debug!("Яндекс: альбом {}", album_id);
            let album = or_empty(Service::Yandex, "альбом", self.fetch_album(album_id))?;
            return convert_album(&album);
        }
        let track_id = entity.track_id.as_deref()?;
        debug!("Яндекс: трек {}", track_id);
        let track = or_empty(Service::Yandex, "трек", self.fetch_track(track_id))?;
        convert_track(&track)
    }
}

/// `avatars.yandex.net/get-music-content/.../%%` to an absolute URL of a
/// fixed size.
pub fn build_cover(uri: Option<&str>) -> Option<String> {
    let uri = uri.map(str::trim).filter(|u| !u.is_empty())?;
    let uri = uri.replace("%%", COVER_SIZE);
    if uri.starts_with("http") {
        Some(uri)
    } else {
        Some(format!("https://{}", uri.trim_start_matches('/')))
    }
}

pub fn track_url(track_id: &str, album_id: Option<&str>) -> String {
    match album_id {
        Some(a) => format!("https://music.yandex.ru/album/{}/track/{}", a, track_id),
        None => format!("https://music.yandex.ru/track/{}", track_id),
    }
}

pub fn album_url(album_id: &str) -> String {
    format!("https://music.yandex.ru/album/{}", album_id)
}

fn convert_track(track: &YmTrack) -> Option<CatalogCandidate> {
    let id = track.id.clone()?;
    let album = track.albums.first();
    let album_id = album.and_then(|a| a.id.clone());
    Some(CatalogCandidate {
        url: Some(track_url(&id, album_id.as_deref())),
        album_url: album_id.as_deref().map(album_url),
        id: Some(id),
        title: track.title.clone(),
        artists: artist_names(track.artists.iter().map(|a| a.name.as_ref())),
        album: album.and_then(|a| a.title.clone()),
        album_id,
        year: track.year.clone().or_else(|| album.and_then(|a| a.year.clone())),
        cover: build_cover(
            album
                .and_then(|a| a.cover_uri.as_deref())
                .or(track.cover_uri.as_deref()),
        ),
    })
}

fn convert_album(album: &YmAlbum) -> Option<CatalogCandidate> {
    let id = album.id.clone()?;
    let url = album_url(&id);
    Some(CatalogCandidate {
        id: Some(id.clone()),
        title: album.title.clone(),
        artists: artist_names(album.artists.iter().map(|a| a.name.as_ref())),
        album: album.title.clone(),
        album_id: Some(id),
        year: album.year.clone(),
        cover: build_cover(album.cover_uri.as_deref()),
        url: Some(url.clone()),
        album_url: Some(url),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH: &str = r#"{
        "tracks": {"items": [
            {"id": 33311009, "title": "Life",
             "artists": [{"name": "Zivert"}],
             "albums": [{"id": 4766246, "title": "Vinyl #1", "year": 2019,
                         "coverUri": "avatars.yandex.net/get-music-content/1/abc/%%"}]}
        ]},
        "albums": {"items": [
            {"id": "3192570", "title": "Партизан", "year": 2020,
             "artists": [{"name": "Хаски"}, {"name": ""}],
             "coverUri": "avatars.yandex.net/get-music-content/2/def/%%"}
        ]}
    }"#;

    #[test]
    fn test_convert_search_payload() {
        let resp: SearchResponse = serde_json::from_str(SEARCH).unwrap();
        let track = convert_track(&resp.tracks.items[0]).unwrap();
        assert_eq!(track.id.as_deref(), Some("33311009"));
        assert_eq!(track.album.as_deref(), Some("Vinyl #1"));
        assert_eq!(track.year.as_deref(), Some("2019"));
        assert_eq!(
            track.url.as_deref(),
            Some("https://music.yandex.ru/album/4766246/track/33311009")
        );
        assert_eq!(
            track.cover.as_deref(),
            Some("https://avatars.yandex.net/get-music-content/1/abc/1000x1000")
        );

        let album = convert_album(&resp.albums.items[0]).unwrap();
        assert_eq!(album.artists, vec!["Хаски".to_string()]);
        assert_eq!(album.url.as_deref(), Some("https://music.yandex.ru/album/3192570"));
    }

    #[test]
    fn test_missing_sections_deserialize() {
        let resp: SearchResponse = serde_json::from_str(r#"{"artists": {}}"#).unwrap();
        assert!(resp.tracks.items.is_empty());
        assert!(resp.albums.items.is_empty());
    }

    #[test]
    fn test_build_cover() {
        assert_eq!(
            build_cover(Some("https://x/%%")).as_deref(),
            Some("https://x/1000x1000")
        );
        assert_eq!(build_cover(Some("/a/b")).as_deref(), Some("https://a/b"));
        assert!(build_cover(Some(" ")).is_none());
    }

    #[test]
    #[ignore]
    fn test_live_search() {
        let client = YandexClient::new(&Config::default()).unwrap();
        let found = client.search("Zivert Life", EntityKind::Track);
        assert!(!found.is_empty());
    }
}
