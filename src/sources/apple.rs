use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use url::Url;

use crate::config::Config;
use crate::core::text::year_from_str;
use crate::models::{CanonicalEntity, CatalogCandidate, EntityKind, Service};
use crate::sources::{de_opt_id, http_client, or_empty, CatalogSource};

const SEARCH_URL: &str = "https://itunes.apple.com/search";
const LOOKUP_URL: &str = "https://itunes.apple.com/lookup";
const SEARCH_LIMIT: &str = "10";

/// Apple Music through the public iTunes Search API.
pub struct AppleClient {
    client: reqwest::blocking::Client,
    storefront: String,
}

#[derive(Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ItunesItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItunesItem {
    wrapper_type: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    track_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    collection_id: Option<String>,
    track_name: Option<String>,
    collection_name: Option<String>,
    artist_name: Option<String>,
    release_date: Option<String>,
    artwork_url100: Option<String>,
    track_view_url: Option<String>,
    collection_view_url: Option<String>,
}

impl AppleClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = http_client(config, config.proxy_for(Service::Apple))
            .context("Apple Music: не удалось создать HTTP-клиент")?;
        Ok(Self {
            client,
            storefront: config.apple.storefront().to_string(),
        })
    }

    fn request(&self, url: &str, query: &[(&str, &str)]) -> Result<SearchResponse> {
        let resp = self
            .client
            .get(url)
            .query(&[("country", self.storefront.as_str())])
            .query(query)
            .send()
            .context("Apple Music: запрос не удался")?
            .error_for_status()
            .context("Apple Music: запрос вернул ошибку")?
            .json()
            .context("Apple Music: не удалось разобрать ответ")?;
        Ok(resp)
    }
}

impl CatalogSource for AppleClient {
    fn service(&self) -> Service {
        Service::Apple
    }

    fn search(&self, query: &str, kind: EntityKind) -> Vec<CatalogCandidate> {
        let entity = if kind.is_album() { "album" } else { "song" };
        let resp = or_empty(
            Service::Apple,
            "поиск",
            self.request(
                SEARCH_URL,
                &[("term", query), ("entity", entity), ("media", "music"), ("limit", SEARCH_LIMIT)],
            ),
        );
        resp.results
            .iter()
            .filter_map(|item| convert_item(item, kind))
            .collect()
    }

    fn lookup(&self, entity: &CanonicalEntity) -> Option<CatalogCandidate> {
        let (id, kind) = match (&entity.track_id, &entity.album_id) {
            (Some(track), _) if !entity.kind.is_album() => (track, EntityKind::Track),
            (_, Some(album)) => (album, EntityKind::Album),
            _ => return None,
        };
        debug!("Apple Music: {} {}", kind, id);
        let resp = or_empty(Service::Apple, "lookup", self.request(LOOKUP_URL, &[("id", id.as_str())]));
        resp.results.iter().find_map(|item| convert_item(item, kind))
    }
}

/// `.../100x100bb.jpg` to the largest rendition the CDN serves.
fn upscale_artwork(url: &str) -> String {
    url.replace("100x100bb", "1000x1000bb")
}

/// Drop the `uo` tracking parameter; keep `i=` which selects the track.
fn clean_view_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "uo")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

fn convert_item(item: &ItunesItem, kind: EntityKind) -> Option<CatalogCandidate> {
    let artists = item
        .artist_name
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|a| vec![a.to_string()])
        .unwrap_or_default();
    let album_url = item.collection_view_url.as_deref().map(clean_view_url);
    let cover = item.artwork_url100.as_deref().map(upscale_artwork);
    let year = item.release_date.as_deref().and_then(year_from_str);

    if kind.is_album() {
        if item.wrapper_type.as_deref() != Some("collection") {
            return None;
        }
        let id = item.collection_id.clone()?;
        return Some(CatalogCandidate {
            id: Some(id.clone()),
            title: item.collection_name.clone(),
            artists,
            album: item.collection_name.clone(),
            album_id: Some(id),
            year,
            cover,
            url: album_url.clone(),
            album_url,
        });
    }

    if item.wrapper_type.as_deref() != Some("track") {
        return None;
    }
    Some(CatalogCandidate {
        id: item.track_id.clone(),
        title: item.track_name.clone(),
        artists,
        album: item.collection_name.clone(),
        album_id: item.collection_id.clone(),
        year,
        cover,
        url: Some(item.track_view_url.as_deref().map(clean_view_url)?),
        album_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{"resultCount": 2, "results": [
        {"wrapperType": "track", "kind": "song", "trackId": 1480390042, "collectionId": 1480389869,
         "trackName": "Life", "collectionName": "Vinyl #1", "artistName": "Zivert",
         "releaseDate": "2019-10-04T12:00:00Z",
         "artworkUrl100": "https://is1-ssl.mzstatic.com/image/thumb/a/100x100bb.jpg",
         "trackViewUrl": "https://music.apple.com/ru/album/life/1480389869?i=1480390042&uo=4",
         "collectionViewUrl": "https://music.apple.com/ru/album/vinyl-1/1480389869?uo=4"},
        {"wrapperType": "collection", "collectionId": 1480389869, "collectionName": "Vinyl #1",
         "artistName": "Zivert", "releaseDate": "2019-10-04T12:00:00Z",
         "collectionViewUrl": "https://music.apple.com/ru/album/vinyl-1/1480389869?uo=4"}
    ]}"#;

    #[test]
    fn test_convert_track() {
        let resp: SearchResponse = serde_json::from_str(RESPONSE).unwrap();
        let found: Vec<_> = resp
            .results
            .iter()
            .filter_map(|i| convert_item(i, EntityKind::Track))
            .collect();
        assert_eq!(found.len(), 1);
        let track = &found[0];
        assert_eq!(
            track.url.as_deref(),
            Some("https://music.apple.com/ru/album/life/1480389869?i=1480390042")
        );
        assert_eq!(
            track.cover.as_deref(),
            Some("https://is1-ssl.mzstatic.com/image/thumb/a/1000x1000bb.jpg")
        );
        assert_eq!(track.year.as_deref(), Some("2019"));
        assert_eq!(track.album_id.as_deref(), Some("1480389869"));
    }

    #[test]
    fn test_convert_album() {
        let resp: SearchResponse = serde_json::from_str(RESPONSE).unwrap();
        let found: Vec<_> = resp
            .results
            .iter()
            .filter_map(|i| convert_item(i, EntityKind::Album))
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].url.as_deref(),
            Some("https://music.apple.com/ru/album/vinyl-1/1480389869")
        );
    }
}
