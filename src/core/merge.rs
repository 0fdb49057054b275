//! Folding metadata fragments into a record, and building the seed record
//! from scraped social tags.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::canonical::{self, canonicalize};
use crate::core::text::{has_artist_title_separator, normalize, pick_year, split_artist_title, year_from_str};
use crate::models::{EntityKind, MetaFragment, MetadataRecord, Service};

/// Yandex/MTS cover URLs embed the album id: ".../get-music-content/123/abc.4567890-1/200x200".
static COVER_ALBUM_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.(\d+)-\d+/").unwrap());

const TITLE_KEYS: [&str; 4] = ["og:title", "title", "music:song", "music:album"];
const DESCRIPTION_KEYS: [&str; 2] = ["og:description", "description"];
const ARTIST_KEYS: [&str; 4] = ["music:musician", "music:artist", "vk:music:artist", "ya:music:artist"];
const ALBUM_KEYS: [&str; 2] = ["music:album", "ya:music:album"];
const YEAR_KEYS: [&str; 2] = ["music:release_date", "ya:music:year"];
const IMAGE_KEYS: [&str; 2] = ["og:image", "og:image:url"];

/// Words storefronts put where an album name should be.
const PLACEHOLDER_ALBUMS: [&str; 4] = ["альбом", "album", "сингл", "single"];

/// Labels that show up in the second description segment instead of a name.
const GENERIC_LABELS: [&str; 6] = ["трек", "track", "сингл", "single", "альбом", "album"];

/// `og:title` values of storefront home pages, served instead of a release
/// page when a link is dead or region-locked.
const LANDING_TITLES: [&str; 8] = [
    "Яндекс Музыка — собираем музыку и подкасты для вас",
    "Яндекс Музыка — собираем музыку для вас",
    "Яндекс Музыка",
    "МТС Музыка",
    "VK Музыка",
    "Музыка ВКонтакте",
    "Звук — музыкальный сервис",
    "Spotify - Web Player: Music for everyone",
];

/// Set title/album/artist and year from the fragment: always when
/// `overwrite`, otherwise only into empty fields. Empty fragment values are
/// ignored either way.
pub fn apply_core_fields(record: &mut MetadataRecord, fragment: &MetaFragment, overwrite: bool) {
    set_field(&mut record.title, &fragment.title, overwrite);
    set_field(&mut record.album, &fragment.album, overwrite);
    set_field(&mut record.artist, &fragment.artist, overwrite);
    set_field(&mut record.year, &fragment.year, overwrite);
}

fn set_field(slot: &mut Option<String>, value: &Option<String>, overwrite: bool) {
    let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
        return;
    };
    if overwrite || is_blank(slot) {
        *slot = Some(value.to_string());
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Fill the image once, from the first non-empty candidate.
pub fn apply_image<'a, I>(record: &mut MetadataRecord, candidates: I)
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    if !is_blank(&record.image) {
        return;
    }
    record.image = candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|img| !img.is_empty())
        .map(str::to_string);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptionParts {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
}

fn bullet_segments(description: &str) -> Vec<&str> {
    description
        .split(['•', '·'])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// "Artist • Album • 2020" (also with "·"). Returns nothing for descriptions
/// without separators, which are usually promotional text.
pub fn parse_description(description: &str) -> DescriptionParts {
    let parts = bullet_segments(description);
    if parts.len() < 2 {
        return DescriptionParts::default();
    }
    let album = parts
        .get(1)
        .copied()
        .filter(|p| !is_generic_label(p) && pick_year([*p]).is_none())
        .map(str::to_string);
    DescriptionParts {
        artist: Some(parts[0].to_string()),
        album,
        year: pick_year(parts.iter().copied()),
    }
}

fn is_generic_label(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    GENERIC_LABELS.iter().any(|label| *label == v)
}

pub fn is_placeholder_album(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    PLACEHOLDER_ALBUMS.iter().any(|p| *p == v)
}

/// Replace "Альбом"/"Сингл"-style album values with the title; album records
/// without an album name get their title too.
pub fn repair_placeholder_album(record: &mut MetadataRecord) {
    let Some(title) = record.title.clone().filter(|t| !t.trim().is_empty()) else {
        return;
    };
    let placeholder = record.album.as_deref().is_some_and(is_placeholder_album);
    let missing_on_album = record.entity.kind.is_album() && is_blank(&record.album);
    if placeholder || missing_on_album {
        record.album = Some(title);
    }
}

/// Storefront home page served in place of the requested release.
pub fn is_storefront_landing(tags: &BTreeMap<String, String>) -> bool {
    let Some(title) = tags.get("og:title") else {
        return false;
    };
    let title = normalize(title);
    if title.is_empty() {
        return false;
    }
    let has_music_tags = tags.keys().any(|k| k.starts_with("music:") || k.starts_with("ya:music"));
    !has_music_tags && LANDING_TITLES.iter().any(|t| normalize(t) == title)
}

fn pick_first<'a>(tags: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| tags.get(*k))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

fn non_url(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.starts_with("http")).map(str::to_string)
}

/// Build the provisional record from a link, its redirect target and the
/// tags scraped from the page.
pub fn seed_record(source_url: &str, resolved_url: Option<&str>, tags: BTreeMap<String, String>) -> MetadataRecord {
    let resolved = resolved_url.unwrap_or(source_url).to_string();
    let mut entity = canonicalize(&resolved);
    // Redirects sometimes drop the ids (VK bounces to /audio); fall back to the source link.
    if !entity.has_ids() {
        let fallback = canonicalize(source_url);
        if entity.service == Service::Unknown {
            entity.service = fallback.service;
        }
        if entity.kind == EntityKind::Unknown {
            entity.kind = fallback.kind;
        }
        entity.track_id = fallback.track_id;
        entity.album_id = fallback.album_id;
        entity.access_key = entity.access_key.or(fallback.access_key);
    }

    let mut record = MetadataRecord {
        source_url: source_url.to_string(),
        resolved_url: resolved,
        entity,
        ..Default::default()
    };

    if is_storefront_landing(&tags) {
        log::warn!("{}: вместо релиза отдана главная страница витрины, теги пропущены", source_url);
        record.raw_tags = tags;
        repair_placeholder_album(&mut record);
        return record;
    }

    let mut title = pick_first(&tags, &TITLE_KEYS).map(str::to_string);
    let description = pick_first(&tags, &DESCRIPTION_KEYS).map(str::to_string);
    let mut artist = non_url(pick_first(&tags, &ARTIST_KEYS));
    let mut album = non_url(pick_first(&tags, &ALBUM_KEYS));
    let mut year = pick_first(&tags, &YEAR_KEYS).and_then(year_from_str);

    if artist.is_none() {
        if let Some(t) = title.as_deref() {
            let (from_title, clean) = split_artist_title(t);
            artist = from_title;
            title = clean;
        }
    }

    if let Some(desc) = description.as_deref() {
        let parts = parse_description(desc);
        if artist.is_none() {
            artist = parts.artist;
        }
        if album.is_none() {
            album = parts.album;
        }
        if year.is_none() {
            year = parts.year;
        }
        if has_artist_title_separator(desc) && bullet_segments(desc).len() < 2 {
            let (artist_desc, title_desc) = split_artist_title(desc);
            if artist.is_none() {
                artist = artist_desc;
            }
            if title.is_none() {
                title = title_desc;
            } else if album.is_none() && title_desc.is_some() && title_desc != title {
                album = title_desc;
            }
        }
    }

    let image = pick_first(&tags, &IMAGE_KEYS).map(str::to_string);
    if record.entity.album_id.is_none() {
        if let Some(img) = image.as_deref() {
            if let Some(caps) = COVER_ALBUM_ID.captures(img) {
                record.entity.album_id = Some(caps[1].to_string());
            }
        }
    }

    // BOOM share pages title releases as "Name - Artist", the reverse of everyone else.
    if record.entity.service == Service::Vk && canonical::is_boom_share(source_url) {
        if let Some(og_title) = tags.get("og:title") {
            if let (Some(left), Some(right)) = split_artist_title(og_title) {
                if record.entity.kind.is_album() {
                    album = Some(left.clone());
                }
                title = Some(left);
                artist = Some(right);
            }
        }
    }

    if record.entity.service == Service::Mts && record.entity.kind == EntityKind::Unknown {
        if let Some(desc) = description.as_deref() {
            record.entity.kind = kind_from_description(desc);
        }
    }

    record.title = title;
    record.artist = artist;
    record.album = album;
    record.year = year;
    record.image = image;
    record.raw_tags = tags;
    repair_placeholder_album(&mut record);
    record
}

fn kind_from_description(description: &str) -> EntityKind {
    let lower = description.to_lowercase();
    if lower.contains("трек") || lower.contains("track") {
        EntityKind::Track
    } else if lower.contains("альбом") || lower.contains("album") {
        EntityKind::Album
    } else {
        EntityKind::Unknown
    }
}
