use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::Config;
use crate::models::{CanonicalEntity, CatalogCandidate, EntityKind, Service};
use crate::sources::{artist_names, de_opt_id, de_opt_year, or_empty, CatalogSource, CredentialProvider};

const API_VERSION: &str = "5.199";
const DEFAULT_HOST: &str = "api.vk.com";
const SEARCH_COUNT: &str = "10";
const MIN_THUMB_WIDTH: u32 = 600;

/// VK audio API. Requires a user token with the `audio` scope.
pub struct VkClient {
    client: reqwest::blocking::Client,
    /// Only set when `api_host` points somewhere other than api.vk.com.
    fallback: Option<reqwest::blocking::Client>,
    token: String,
    api_host: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    response: Option<T>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    error_code: Option<i64>,
    error_msg: Option<String>,
}

#[derive(Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AudioList {
    Bare(Vec<VkAudio>),
    Wrapped(ItemList<VkAudio>),
}

impl AudioList {
    fn into_items(self) -> Vec<VkAudio> {
        match self {
            AudioList::Bare(items) => items,
            AudioList::Wrapped(list) => list.items,
        }
    }
}

/// Some tokens get the playlist at the root of `response`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PlaylistResponse {
    Wrapped {
        playlist: VkPlaylist,
        #[serde(default)]
        audios: Vec<VkAudio>,
    },
    Bare(VkPlaylist),
}

#[derive(Deserialize)]
struct VkAudio {
    #[serde(default, deserialize_with = "de_opt_id")]
    id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    owner_id: Option<String>,
    artist: Option<String>,
    title: Option<String>,
    access_key: Option<String>,
    #[serde(default)]
    main_artists: Vec<VkArtist>,
    album: Option<VkAudioAlbum>,
    #[serde(default, deserialize_with = "de_opt_year")]
    date: Option<String>,
}

#[derive(Deserialize)]
struct VkAudioAlbum {
    #[serde(default, deserialize_with = "de_opt_id")]
    id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    owner_id: Option<String>,
    title: Option<String>,
    access_key: Option<String>,
    access_hash: Option<String>,
    thumb: Option<VkPhoto>,
    #[serde(default, deserialize_with = "de_opt_year")]
    year: Option<String>,
    #[serde(default, deserialize_with = "de_opt_year")]
    release_year: Option<String>,
}

#[derive(Deserialize)]
struct VkPlaylist {
    #[serde(default, deserialize_with = "de_opt_id")]
    id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    owner_id: Option<String>,
    title: Option<String>,
    access_key: Option<String>,
    #[serde(default)]
    main_artists: Vec<VkArtist>,
    #[serde(default, deserialize_with = "de_opt_year")]
    year: Option<String>,
    #[serde(default)]
    thumbs: Vec<VkThumb>,
    photo: Option<VkPhoto>,
}

#[derive(Deserialize)]
struct VkArtist {
    name: Option<String>,
}

#[derive(Deserialize)]
struct VkThumb {
    url: Option<String>,
    #[serde(default)]
    width: u32,
}

#[derive(Deserialize)]
struct VkPhoto {
    photo_1200: Option<String>,
    photo_600: Option<String>,
    photo_300: Option<String>,
    photo_270: Option<String>,
}

impl VkPhoto {
    fn best(&self) -> Option<String> {
        [&self.photo_1200, &self.photo_600, &self.photo_300, &self.photo_270]
            .into_iter()
            .flatten()
            .find(|u| !u.is_empty())
            .cloned()
    }
}

impl VkClient {
    pub fn new(config: &Config) -> Result<Self> {
        let token = config
            .credential(Service::Vk)
            .context("VK: токен не задан (vk.access_token или VK_ACCESS_TOKEN)")?;
        let api_host = config.vk.api_host().to_string();
        let proxy = config.proxy_for(Service::Vk);

        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(config.http.user_agent())
            .timeout(config.http.timeout());
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("VK: некорректный адрес прокси")?);
        }
        let fallback = if api_host != DEFAULT_HOST {
            // The override is usually a bare IP, so the certificate never matches.
            builder = builder.danger_accept_invalid_certs(true);
            Some(super::http_client(config, proxy)?)
        } else {
            None
        };
        let client = builder.build().context("VK: не удалось создать HTTP-клиент")?;

        Ok(Self {
            client,
            fallback,
            token,
            api_host,
        })
    }

    fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, &str)]) -> Result<T> {
        let mut form: Vec<(&str, &str)> = vec![("access_token", self.token.as_str()), ("v", API_VERSION)];
        form.extend_from_slice(params);

        let sent = self
            .client
            .post(format!("https://{}/method/{}", self.api_host, method))
            .header("Host", DEFAULT_HOST)
            .form(&form)
            .send()
            .and_then(|r| r.error_for_status());
        let resp = match (sent, &self.fallback) {
            (Ok(resp), _) => resp,
            (Err(e), Some(fallback)) => {
                warn!("VK: {} недоступен ({}), пробую {}", self.api_host, e, DEFAULT_HOST);
                fallback
                    .post(format!("https://{}/method/{}", DEFAULT_HOST, method))
                    .form(&form)
                    .send()
                    .with_context(|| format!("VK: {} не удался", method))?
                    .error_for_status()
                    .with_context(|| format!("VK: {} вернул ошибку", method))?
            }
            (Err(e), None) => return Err(e).with_context(|| format!("VK: {} не удался", method)),
        };

        let envelope: Envelope<T> = resp
            .json()
            .with_context(|| format!("VK: не удалось разобрать ответ {}", method))?;
        if let Some(err) = envelope.error {
            bail!(
                "VK API {}: {} ({})",
                method,
                err.error_msg.unwrap_or_default(),
                err.error_code.unwrap_or_default()
            );
        }
        envelope
            .response
            .with_context(|| format!("VK: пустой ответ {}", method))
    }

    fn search_audio(&self, query: &str) -> Result<Vec<VkAudio>> {
        let list: ItemList<VkAudio> = self.call("audio.search", &[("q", query), ("count", SEARCH_COUNT)])?;
        Ok(list.items)
    }

    fn fetch_audio(&self, track_id: &str, access_key: Option<&str>) -> Result<Option<VkAudio>> {
        let audios = match access_key {
            Some(key) => format!("{}_{}", track_id, key),
            None => track_id.to_string(),
        };
        let list: AudioList = self.call("audio.getById", &[("audios", audios.as_str())])?;
        Ok(list.into_items().into_iter().next())
    }

    fn fetch_playlist(&self, playlist_id: &str, access_key: Option<&str>) -> Result<Option<CatalogCandidate>> {
        let Some((owner, id)) = playlist_id.split_once('_') else {
            bail!("VK: идентификатор плейлиста должен иметь вид owner_id: {}", playlist_id);
        };
        let mut params = vec![
            ("owner_id", owner),
            ("playlist_id", id),
            ("need_playlist", "1"),
            ("need_tracks", "1"),
        ];
        if let Some(key) = access_key {
            params.push(("access_key", key));
            params.push(("access_hash", key));
        }
        let resp: PlaylistResponse = self.call("audio.getPlaylistById", &params)?;
        Ok(convert_playlist(resp, access_key))
    }
}

impl CatalogSource for VkClient {
    fn service(&self) -> Service {
        Service::Vk
    }

    fn search(&self, query: &str, kind: EntityKind) -> Vec<CatalogCandidate> {
        if kind.is_album() {
            // No album search here; albums come from the tracks' parents.
            debug!("VK: поиск альбомов не поддерживается");
            return Vec::new();
        }
        or_empty(Service::Vk, "поиск", self.search_audio(query))
            .iter()
            .filter_map(convert_audio)
            .collect()
    }

    fn lookup(&self, entity: &CanonicalEntity) -> Option<CatalogCandidate> {
        let key = entity.access_key.as_deref();
        if entity.kind.is_album() || entity.track_id.is_none() {
            let album_id = entity.album_id.as_deref()?;
            return or_empty(Service::Vk, "плейлист", self.fetch_playlist(album_id, key));
        }
        let track_id = entity.track_id.as_deref()?;
        let audio = or_empty(Service::Vk, "трек", self.fetch_audio(track_id, key))?;
        convert_audio(&audio)
    }
}

fn key_suffix(key: Option<&str>) -> String {
    key.filter(|k| !k.is_empty())
        .map(|k| format!("_{}", k))
        .unwrap_or_default()
}

pub fn audio_url(owner_item: &str, access_key: Option<&str>) -> String {
    format!("https://vk.com/audio{}{}", owner_item, key_suffix(access_key))
}

pub fn album_url(owner_item: &str, access_key: Option<&str>) -> String {
    format!("https://vk.com/music/album/{}{}", owner_item, key_suffix(access_key))
}

fn owner_item(owner: Option<&String>, id: Option<&String>) -> Option<String> {
    Some(format!("{}_{}", owner?, id?))
}

fn convert_audio(audio: &VkAudio) -> Option<CatalogCandidate> {
    let id = owner_item(audio.owner_id.as_ref(), audio.id.as_ref())?;
    let album = audio.album.as_ref();

    let mut artists = artist_names(audio.main_artists.iter().map(|a| a.name.as_ref()));
    if artists.is_empty() {
        artists = artist_names([audio.artist.as_ref()]);
    }

    let album_id = album.and_then(|a| owner_item(a.owner_id.as_ref().or(audio.owner_id.as_ref()), a.id.as_ref()));
    let album_key = album.and_then(|a| a.access_hash.as_deref().or(a.access_key.as_deref()));

    Some(CatalogCandidate {
        url: Some(audio_url(&id, audio.access_key.as_deref())),
        album_url: album_id.as_deref().map(|a| album_url(a, album_key)),
        id: Some(id),
        title: audio.title.clone(),
        artists,
        album: album.and_then(|a| a.title.clone()),
        album_id,
        year: album
            .and_then(|a| a.year.clone().or_else(|| a.release_year.clone()))
            .or_else(|| audio.date.clone()),
        cover: album.and_then(|a| a.thumb.as_ref()).and_then(VkPhoto::best),
    })
}

fn convert_playlist(resp: PlaylistResponse, access_key: Option<&str>) -> Option<CatalogCandidate> {
    let (playlist, audios) = match resp {
        PlaylistResponse::Wrapped { playlist, audios } => (playlist, audios),
        PlaylistResponse::Bare(playlist) => (playlist, Vec::new()),
    };
    let id = owner_item(playlist.owner_id.as_ref(), playlist.id.as_ref())?;
    let key = access_key.or(playlist.access_key.as_deref());

    let mut artists = artist_names(playlist.main_artists.iter().map(|a| a.name.as_ref()));
    if artists.is_empty() {
        artists = audios
            .first()
            .map(|t| artist_names([t.artist.as_ref()]))
            .unwrap_or_default();
    }

    let cover = playlist
        .thumbs
        .iter()
        .find(|t| t.width >= MIN_THUMB_WIDTH)
        .and_then(|t| t.url.clone())
        .or_else(|| playlist.photo.as_ref().and_then(VkPhoto::best));

    let url = album_url(&id, key);
    Some(CatalogCandidate {
        id: Some(id.clone()),
        title: playlist.title.clone(),
        artists,
        album: playlist.title.clone(),
        album_id: Some(id),
        year: playlist.year.clone(),
        cover,
        url: Some(url.clone()),
        album_url: Some(url),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUDIO: &str = r#"{
        "id": 456239017, "owner_id": -2001899747, "artist": "Zivert feat. Someone",
        "title": "Life", "access_key": "abc",
        "main_artists": [{"name": "Zivert"}],
        "album": {"id": 4, "owner_id": -2000956728, "title": "Vinyl #1",
                  "access_key": "k1", "year": 2019,
                  "thumb": {"photo_600": "https://sun/600.jpg", "photo_1200": "https://sun/1200.jpg"}},
        "date": 1564000000
    }"#;

    #[test]
    fn test_convert_audio() {
        let audio: VkAudio = serde_json::from_str(AUDIO).unwrap();
        let cand = convert_audio(&audio).unwrap();
        assert_eq!(cand.id.as_deref(), Some("-2001899747_456239017"));
        assert_eq!(cand.url.as_deref(), Some("https://vk.com/audio-2001899747_456239017_abc"));
        assert_eq!(cand.artists, vec!["Zivert".to_string()]);
        assert_eq!(cand.year.as_deref(), Some("2019"));
        assert_eq!(cand.cover.as_deref(), Some("https://sun/1200.jpg"));
        assert_eq!(
            cand.album_url.as_deref(),
            Some("https://vk.com/music/album/-2000956728_4_k1")
        );
    }

    #[test]
    fn test_search_without_items() {
        let list: ItemList<VkAudio> = serde_json::from_str(r#"{"count": 0}"#).unwrap();
        assert!(list.items.is_empty());
    }

    #[test]
    fn test_get_by_id_shapes() {
        let bare: AudioList = serde_json::from_str(&format!("[{}]", AUDIO)).unwrap();
        assert_eq!(bare.into_items().len(), 1);
        let wrapped: AudioList = serde_json::from_str(&format!(r#"{{"items": [{}]}}"#, AUDIO)).unwrap();
        assert_eq!(wrapped.into_items().len(), 1);
    }

    #[test]
    fn test_playlist_shapes() {
        let wrapped: PlaylistResponse = serde_json::from_str(
            r#"{"playlist": {"id": 25956728, "owner_id": -2000956728, "title": "Партизан",
                             "year": 2020,
                             "thumbs": [{"url": "https://t/300", "width": 300},
                                        {"url": "https://t/600", "width": 600}]},
                "audios": [{"id": 1, "owner_id": 2, "artist": "Хаски", "title": "a"}]}"#,
        )
        .unwrap();
        let cand = convert_playlist(wrapped, Some("key")).unwrap();
        assert_eq!(cand.artists, vec!["Хаски".to_string()]);
        assert_eq!(cand.cover.as_deref(), Some("https://t/600"));
        assert_eq!(
            cand.url.as_deref(),
            Some("https://vk.com/music/album/-2000956728_25956728_key")
        );

        let bare: PlaylistResponse = serde_json::from_str(
            r#"{"id": 1, "owner_id": -5, "title": "X", "main_artists": [{"name": "Y"}],
                "photo": {"photo_300": "https://p/300"}}"#,
        )
        .unwrap();
        let cand = convert_playlist(bare, None).unwrap();
        assert_eq!(cand.url.as_deref(), Some("https://vk.com/music/album/-5_1"));
        assert_eq!(cand.cover.as_deref(), Some("https://p/300"));
    }

    #[test]
    fn test_error_envelope() {
        let env: Envelope<ItemList<VkAudio>> =
            serde_json::from_str(r#"{"error": {"error_code": 5, "error_msg": "User authorization failed"}}"#)
                .unwrap();
        assert!(env.response.is_none());
        assert_eq!(env.error.and_then(|e| e.error_code), Some(5));
    }

    #[test]
    fn test_client_needs_token() {
        assert!(VkClient::new(&Config::default()).is_err());
    }
}
