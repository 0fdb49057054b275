use anyhow::{Context, Result};
use log::debug;
use scraper::{Html, Selector};
use serde::Deserialize;

use crate::config::Config;
use crate::models::{CanonicalEntity, CatalogCandidate, EntityKind, Service};
use crate::sources::yandex::build_cover;
use crate::sources::{artist_names, de_opt_id, de_opt_year, http_client, or_empty, CatalogSource};

const SEARCH_URL: &str = "https://music.mts.ru/search";
const API_BASE: &str = "https://api.music.mts.ru/web/v1";

/// MTS Music. It runs on the Yandex catalog, so ids are shared with it.
pub struct MtsClient {
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct NextData {
    props: NextProps,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextProps {
    page_props: PageProps,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageProps {
    search_result: Option<SearchResult>,
}

#[derive(Deserialize, Default)]
struct SearchResult {
    #[serde(default)]
    tracks: Vec<MtsTrack>,
    #[serde(default)]
    albums: Vec<MtsAlbum>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MtsTrack {
    #[serde(default, deserialize_with = "de_opt_id")]
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    artists: Vec<MtsArtist>,
    album: Option<MtsAlbum>,
    album_title: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    album_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_year")]
    year: Option<String>,
    #[serde(alias = "coverUri")]
    cover: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MtsAlbum {
    #[serde(default, deserialize_with = "de_opt_id")]
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    artists: Vec<MtsArtist>,
    #[serde(default, deserialize_with = "de_opt_year")]
    year: Option<String>,
    #[serde(alias = "coverUri")]
    cover: Option<String>,
}

#[derive(Deserialize)]
struct MtsArtist {
    name: Option<String>,
}

#[derive(Deserialize)]
struct ApiList<T> {
    #[serde(default = "Vec::new")]
    result: Vec<T>,
}

#[derive(Deserialize)]
struct ApiOne<T> {
    result: Option<T>,
}

impl MtsClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = http_client(config, config.proxy_for(Service::Mts))
            .context("МТС: не удалось создать HTTP-клиент")?;
        Ok(Self { client })
    }

    fn search_page(&self, query: &str) -> Result<SearchResult> {
        let html = self
            .client
            .get(SEARCH_URL)
            .query(&[("text", query)])
            .send()
            .context("МТС: поиск не удался")?
            .error_for_status()
            .context("МТС: поиск вернул ошибку")?
            .text()
            .context("МТС: не удалось прочитать страницу поиска")?;
        parse_search_page(&html)
    }

    fn api_get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let resp = self
            .client
            .get(format!("{}/{}", API_BASE, path))
            .query(query)
            .header("X-Music-Client", "web")
            .header("X-Yandex-Music-Client", "MTSMusicWebPremium/2.4.1")
            .header("Content-Type", "application/json")
            .send()
            .with_context(|| format!("МТС API: запрос {} не удался", path))?
            .error_for_status()
            .with_context(|| format!("МТС API: {} вернул ошибку", path))?
            .json()
            .with_context(|| format!("МТС API: не удалось разобрать {}", path))?;
        Ok(resp)
    }

    fn fetch_track(&self, track_id: &str) -> Result<Option<MtsTrack>> {
        let list: ApiList<MtsTrack> = self.api_get("tracks", &[("ids", track_id)])?;
        Ok(list.result.into_iter().next())
    }

    fn fetch_album(&self, album_id: &str) -> Result<Option<MtsAlbum>> {
        let one: ApiOne<MtsAlbum> = self.api_get(&format!("albums/{}", album_id), &[])?;
        Ok(one.result)
    }
}

impl CatalogSource for MtsClient {
    fn service(&self) -> Service {
        Service::Mts
    }

    fn search(&self, query: &str, kind: EntityKind) -> Vec<CatalogCandidate> {
        let result = or_empty(Service::Mts, "поиск", self.search_page(query));
        if kind.is_album() {
            result.albums.iter().filter_map(convert_album).collect()
        } else {
            result.tracks.iter().filter_map(convert_track).collect()
        }
    }

    fn lookup(&self, entity: &CanonicalEntity) -> Option<CatalogCandidate> {
        let wants_album = entity.kind.is_album() || entity.track_id.is_none();
        if wants_album {
            let album_id = entity.album_id.as_deref().filter(|id| is_numeric(id))?;
            debug!("МТС: альбом {}", album_id);
            let album = or_empty(Service::Mts, "альбом", self.fetch_album(album_id))?;
            return convert_album(&album);
        }
        let track_id = entity.track_id.as_deref().filter(|id| is_numeric(id))?;
        debug!("МТС: трек {}", track_id);
        let track = or_empty(Service::Mts, "трек", self.fetch_track(track_id))?;
        convert_track(&track)
    }
}

fn is_numeric(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
}

/// `searchResult` from the page's `__NEXT_DATA__` script.
fn parse_search_page(html: &str) -> Result<SearchResult> {
    let document = Html::parse_document(html);
    let script_sel = Selector::parse("script#__NEXT_DATA__").unwrap();
    let script = document
        .select(&script_sel)
        .next()
        .context("МТС: на странице нет __NEXT_DATA__")?;
    let raw = script.text().collect::<String>();
    let data: NextData = serde_json::from_str(&raw).context("МТС: некорректный __NEXT_DATA__")?;
    Ok(data.props.page_props.search_result.unwrap_or_default())
}

pub fn track_url(track_id: &str) -> String {
    format!("https://music.mts.ru/track/{}", track_id)
}

pub fn album_url(album_id: &str) -> String {
    format!("https://music.mts.ru/album/{}", album_id)
}

fn convert_track(track: &MtsTrack) -> Option<CatalogCandidate> {
    let id = track.id.clone()?;
    let album = track.album.as_ref();
    let album_id = track
        .album_id
        .clone()
        .or_else(|| album.and_then(|a| a.id.clone()));
    Some(CatalogCandidate {
        url: Some(track_url(&id)),
        album_url: album_id.as_deref().map(album_url),
        id: Some(id),
        title: track.title.clone(),
        artists: artist_names(track.artists.iter().map(|a| a.name.as_ref())),
        album: track
            .album_title
            .clone()
            .or_else(|| album.and_then(|a| a.title.clone())),
        album_id,
        year: track.year.clone().or_else(|| album.and_then(|a| a.year.clone())),
        cover: build_cover(
            album
                .and_then(|a| a.cover.as_deref())
                .or(track.cover.as_deref()),
        ),
    })
}

fn convert_album(album: &MtsAlbum) -> Option<CatalogCandidate> {
    let id = album.id.clone()?;
    let url = album_url(&id);
    Some(CatalogCandidate {
        id: Some(id.clone()),
        title: album.title.clone(),
        artists: artist_names(album.artists.iter().map(|a| a.name.as_ref())),
        album: album.title.clone(),
        album_id: Some(id),
        year: album.year.clone(),
        cover: build_cover(album.cover.as_deref()),
        url: Some(url.clone()),
        album_url: Some(url),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head></head><body>
<script id="__NEXT_DATA__" type="application/json">
{"props": {"pageProps": {"searchResult": {
  "tracks": [
    {"id": 33311009, "title": "Life", "artists": [{"name": "Zivert"}],
     "albumTitle": "Vinyl #1", "albumId": 4766246}
  ],
  "albums": [
    {"id": "3192570", "title": "Партизан", "artists": [{"name": "Хаски"}],
     "year": 2020, "coverUri": "avatars.yandex.net/get-music-content/2/def/%%"}
  ]
}}}}
</script></body></html>"#;

    #[test]
    fn test_parse_search_page() {
        let result = parse_search_page(PAGE).unwrap();
        let track = convert_track(&result.tracks[0]).unwrap();
        assert_eq!(track.url.as_deref(), Some("https://music.mts.ru/track/33311009"));
        assert_eq!(track.album.as_deref(), Some("Vinyl #1"));
        assert_eq!(track.album_url.as_deref(), Some("https://music.mts.ru/album/4766246"));

        let album = convert_album(&result.albums[0]).unwrap();
        assert_eq!(album.title.as_deref(), Some("Партизан"));
        assert_eq!(
            album.cover.as_deref(),
            Some("https://avatars.yandex.net/get-music-content/2/def/1000x1000")
        );
    }

    #[test]
    fn test_page_without_results() {
        let page = r#"<script id="__NEXT_DATA__">{"props": {"pageProps": {}}}</script>"#;
        let result = parse_search_page(page).unwrap();
        assert!(result.tracks.is_empty() && result.albums.is_empty());
        assert!(parse_search_page("<html></html>").is_err());
    }

    #[test]
    fn test_api_track_payload() {
        let raw = r#"{"result": [{"id": "1", "title": "Life", "artists": [{"name": "Zivert"}],
            "album": {"id": 2, "title": "Vinyl #1", "year": 2019, "cover": "https://c/%%"}}]}"#;
        let list: ApiList<MtsTrack> = serde_json::from_str(raw).unwrap();
        let track = convert_track(&list.result[0]).unwrap();
        assert_eq!(track.album_id.as_deref(), Some("2"));
        assert_eq!(track.year.as_deref(), Some("2019"));
        assert_eq!(track.cover.as_deref(), Some("https://c/1000x1000"));
    }

    #[test]
    fn test_api_payload_without_result() {
        let list: ApiList<MtsTrack> = serde_json::from_str(r#"{"error": null}"#).unwrap();
        assert!(list.result.is_empty());
    }

    #[test]
    fn test_non_numeric_ids_are_not_looked_up() {
        assert!(is_numeric("123"));
        assert!(!is_numeric("abc"));
        assert!(!is_numeric(""));
    }
}
