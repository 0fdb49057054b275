use anyhow::{Context, Result};
use base64::Engine;
use log::debug;
use serde::Deserialize;

use crate::config::Config;
use crate::core::text::year_from_str;
use crate::models::{CanonicalEntity, CatalogCandidate, EntityKind, Service};
use crate::sources::{artist_names, http_client, or_empty, CatalogSource};

const API_BASE: &str = "https://api.spotify.com/v1";

pub struct SpotifyClient {
    client: reqwest::blocking::Client,
    access_token: String,
    market: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize, Default)]
struct SearchResponse {
    tracks: Option<Page<SpotifyTrack>>,
    albums: Option<Page<SpotifyAlbum>>,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<Option<T>>,
}

#[derive(Deserialize)]
struct SpotifyTrack {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
    external_urls: Option<ExternalUrls>,
}

#[derive(Deserialize)]
struct SpotifyAlbum {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    release_date: Option<String>,
    #[serde(default)]
    images: Vec<SpotifyImage>,
    external_urls: Option<ExternalUrls>,
}

#[derive(Deserialize)]
struct SpotifyArtist {
    name: Option<String>,
}

#[derive(Deserialize)]
struct SpotifyImage {
    url: String,
    width: Option<u32>,
}

#[derive(Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

impl SpotifyClient {
    pub fn new(config: &Config) -> Result<Self> {
        let spotify = &config.spotify;
        let client_id = spotify
            .client_id
            .as_ref()
            .context("Spotify client_id не задан")?;
        let client_secret = spotify
            .client_secret
            .as_ref()
            .context("Spotify client_secret не задан")?;

        let client = http_client(config, config.proxy_for(Service::Spotify))?;
        let access_token = Self::authenticate(&client, client_id, client_secret)?;

        Ok(Self {
            client,
            access_token,
            market: spotify
                .market
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
        })
    }

    fn authenticate(
        client: &reqwest::blocking::Client,
        client_id: &str,
        client_secret: &str,
    ) -> Result<String> {
        let credentials = format!("{}:{}", client_id, client_secret);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);

        let resp: TokenResponse = client
            .post("https://accounts.spotify.com/api/token")
            .header("Authorization", format!("Basic {}", encoded))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .context("не удалось подключиться к Spotify")?
            .error_for_status()
            .context("Spotify отклонил авторизацию. Проверьте client_id и client_secret.")?
            .json()
            .context("не удалось разобрать токен Spotify")?;

        Ok(resp.access_token)
    }

    fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let mut request = self
            .client
            .get(format!("{}/{}", API_BASE, path))
            .bearer_auth(&self.access_token)
            .query(query);
        if let Some(market) = &self.market {
            request = request.query(&[("market", market.as_str())]);
        }
        let resp = request
            .send()
            .with_context(|| format!("Spotify: запрос {} не удался", path))?
            .error_for_status()
            .with_context(|| format!("Spotify: {} вернул ошибку", path))?
            .json()
            .with_context(|| format!("Spotify: не удалось разобрать ответ {}", path))?;
        Ok(resp)
    }

    fn search_raw(&self, query: &str, kind: EntityKind) -> Result<SearchResponse> {
        let search_type = if kind.is_album() { "album" } else { "track" };
        self.get("search", &[("q", query), ("type", search_type), ("limit", "10")])
    }
}

impl CatalogSource for SpotifyClient {
    fn service(&self) -> Service {
        Service::Spotify
    }

    fn search(&self, query: &str, kind: EntityKind) -> Vec<CatalogCandidate> {
        let resp = or_empty(Service::Spotify, "поиск", self.search_raw(query, kind));
        if kind.is_album() {
            resp.albums
                .map(|p| p.items.iter().flatten().filter_map(convert_album).collect())
                .unwrap_or_default()
        } else {
            resp.tracks
                .map(|p| p.items.iter().flatten().filter_map(convert_track).collect())
                .unwrap_or_default()
        }
    }

    fn lookup(&self, entity: &CanonicalEntity) -> Option<CatalogCandidate> {
        if entity.kind.is_album() || entity.track_id.is_none() {
            let id = entity.album_id.as_deref()?;
            debug!("Spotify: альбом {}", id);
            let album: Option<SpotifyAlbum> =
                or_empty(Service::Spotify, "альбом", self.get(&format!("albums/{}", id), &[]).map(Some));
            return album.as_ref().and_then(convert_album);
        }
        let id = entity.track_id.as_deref()?;
        debug!("Spotify: трек {}", id);
        let track: Option<SpotifyTrack> =
            or_empty(Service::Spotify, "трек", self.get(&format!("tracks/{}", id), &[]).map(Some));
        track.as_ref().and_then(convert_track)
    }
}

fn largest_image(images: &[SpotifyImage]) -> Option<String> {
    images
        .iter()
        .max_by_key(|img| img.width.unwrap_or(0))
        .map(|img| img.url.clone())
}

fn spotify_url(urls: Option<&ExternalUrls>, kind: &str, id: &str) -> String {
    urls.and_then(|u| u.spotify.clone())
        .unwrap_or_else(|| format!("https://open.spotify.com/{}/{}", kind, id))
}

fn convert_track(track: &SpotifyTrack) -> Option<CatalogCandidate> {
    let id = track.id.clone()?;
    let album = track.album.as_ref();
    let album_id = album.and_then(|a| a.id.clone());
    Some(CatalogCandidate {
        url: Some(spotify_url(track.external_urls.as_ref(), "track", &id)),
        album_url: album
            .zip(album_id.as_deref())
            .map(|(a, aid)| spotify_url(a.external_urls.as_ref(), "album", aid)),
        id: Some(id),
        title: track.name.clone(),
        artists: artist_names(track.artists.iter().map(|a| a.name.as_ref())),
        album: album.and_then(|a| a.name.clone()),
        album_id,
        year: album
            .and_then(|a| a.release_date.as_deref())
            .and_then(year_from_str),
        cover: album.and_then(|a| largest_image(&a.images)),
    })
}

fn convert_album(album: &SpotifyAlbum) -> Option<CatalogCandidate> {
    let id = album.id.clone()?;
    let url = spotify_url(album.external_urls.as_ref(), "album", &id);
    Some(CatalogCandidate {
        id: Some(id.clone()),
        title: album.name.clone(),
        artists: artist_names(album.artists.iter().map(|a| a.name.as_ref())),
        album: album.name.clone(),
        album_id: Some(id),
        year: album.release_date.as_deref().and_then(year_from_str),
        cover: largest_image(&album.images),
        url: Some(url.clone()),
        album_url: Some(url),
    })
}
