use url::Url;

use crate::models::{CanonicalEntity, EntityKind, Service};

/// Parse a link, tolerating a missing scheme ("music.yandex.ru/album/1").
pub fn parse_url(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match Url::parse(raw) {
        Ok(url) if url.host_str().is_some() => Some(url),
        _ => Url::parse(&format!("https://{}", raw))
            .ok()
            .filter(|u| u.host_str().is_some()),
    }
}

pub fn host_of(raw: &str) -> String {
    parse_url(raw)
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn is_vk_host(host: &str) -> bool {
    host.contains("vk.")
        || matches!(host, "vk.com" | "m.vk.com" | "vk.ru" | "m.vk.ru")
        || host.contains("boom.ru")
}

pub fn is_youtube_host(host: &str) -> bool {
    host.contains("youtube.com") || host == "youtu.be" || host.ends_with(".youtu.be")
}

pub fn is_boom_share(raw: &str) -> bool {
    host_of(raw).contains("share.boom.ru")
}

/// VK or YouTube link that is not a recognisable music entity.
pub fn is_non_music_link(raw: &str) -> bool {
    let host = host_of(raw);
    let entity = canonicalize(raw);
    entity.service == Service::Unknown && (is_vk_host(&host) || is_youtube_host(&host))
}

/// Map a shared link onto `(service, kind, track_id, album_id, access_key)`.
///
/// Never fails: anything unrecognised comes back with `Service::Unknown`
/// and no ids. Short links (MTS `onelink.me`) resolve to the service with an
/// unknown kind; callers re-run this on the redirect target.
pub fn canonicalize(raw: &str) -> CanonicalEntity {
    let Some(url) = parse_url(raw) else {
        return CanonicalEntity::default();
    };
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    let access_key = query_param(&url, "access_key").or_else(|| query_param(&url, "access_hash"));

    let (service, ids) = if host.contains("yandex") {
        (Service::Yandex, parse_yandex(&segments))
    } else if host.contains("mts") || host.contains("onelink.me") {
        (Service::Mts, parse_mts(&host, &segments))
    } else if host.contains("shazam.com") {
        (Service::Shazam, parse_shazam(&segments))
    } else if host == "music.youtube.com" {
        (Service::Ytmusic, parse_ytmusic(&url, &segments))
    } else if host.contains("music.apple.com") {
        (Service::Apple, parse_apple(&url, &segments))
    } else if host.contains("spotify.com") {
        (Service::Spotify, parse_spotify(&segments))
    } else if host.contains("zvuk.com") {
        (Service::Zvuk, parse_zvuk(&segments))
    } else if is_vk_host(&host) {
        match parse_vk(&url, &host, &segments) {
            Some(ids) => (Service::Vk, Some(ids)),
            None => return CanonicalEntity::default(),
        }
    } else {
        (Service::Unknown, None)
    };

    let mut entity = CanonicalEntity {
        service,
        access_key,
        ..Default::default()
    };
    if let Some(ids) = ids {
        entity.kind = ids.kind;
        entity.track_id = ids.track_id;
        entity.album_id = ids.album_id;
        if entity.access_key.is_none() {
            entity.access_key = ids.access_key;
        }
    }
    entity
}

/// Canonical link for an entity, when the service has a stable URL scheme.
pub fn direct_url(entity: &CanonicalEntity) -> Option<String> {
    let track = entity.track_id.as_deref();
    let album = entity.album_id.as_deref();
    let kind = entity.kind;
    match entity.service {
        Service::Yandex => match (kind, track, album) {
            (EntityKind::Album, _, Some(a)) => Some(format!("https://music.yandex.ru/album/{}", a)),
            (_, Some(t), Some(a)) => Some(format!("https://music.yandex.ru/album/{}/track/{}", a, t)),
            (_, Some(t), None) => Some(format!("https://music.yandex.ru/track/{}", t)),
            (_, None, Some(a)) => Some(format!("https://music.yandex.ru/album/{}", a)),
            _ => None,
        },
        Service::Mts => match (kind, track, album) {
            (EntityKind::Album, _, Some(a)) => Some(format!("https://music.mts.ru/album/{}", a)),
            (_, Some(t), _) => Some(format!("https://music.mts.ru/track/{}", t)),
            (_, None, Some(a)) => Some(format!("https://music.mts.ru/album/{}", a)),
            _ => None,
        },
        Service::Vk => {
            let suffix = entity
                .access_key
                .as_deref()
                .map(|k| format!("_{}", k))
                .unwrap_or_default();
            match (kind, track, album) {
                (EntityKind::Album, _, Some(a)) => {
                    Some(format!("https://vk.com/music/album/{}{}", a, suffix))
                }
                (_, Some(t), _) if t.contains('_') => Some(format!("https://vk.com/audio{}{}", t, suffix)),
                _ => None,
            }
        }
        Service::Zvuk => match (kind, track, album) {
            (EntityKind::Album, _, Some(a)) => Some(format!("https://zvuk.com/release/{}", a)),
            (_, Some(t), _) => Some(format!("https://zvuk.com/track/{}", t)),
            _ => None,
        },
        Service::Spotify => match (kind, track, album) {
            (EntityKind::Album, _, Some(a)) => Some(format!("https://open.spotify.com/album/{}", a)),
            (_, Some(t), _) => Some(format!("https://open.spotify.com/track/{}", t)),
            _ => None,
        },
        Service::Ytmusic => match (kind, track, album) {
            (EntityKind::Album, _, Some(a)) if a.starts_with("MPRE") => {
                Some(format!("https://music.youtube.com/browse/{}", a))
            }
            (EntityKind::Album, _, Some(a)) => Some(format!("https://music.youtube.com/playlist?list={}", a)),
            (_, Some(t), _) => Some(format!("https://music.youtube.com/watch?v={}", t)),
            _ => None,
        },
        Service::Shazam => track.map(|t| format!("https://www.shazam.com/track/{}", t)),
        // Apple links carry a slug we cannot rebuild from ids alone.
        Service::Apple | Service::Unknown => None,
    }
}

struct ParsedIds {
    kind: EntityKind,
    track_id: Option<String>,
    album_id: Option<String>,
    access_key: Option<String>,
}

impl ParsedIds {
    fn track(id: &str) -> Self {
        Self {
            kind: EntityKind::Track,
            track_id: Some(id.to_string()),
            album_id: None,
            access_key: None,
        }
    }

    fn album(id: &str) -> Self {
        Self {
            kind: EntityKind::Album,
            track_id: None,
            album_id: Some(id.to_string()),
            access_key: None,
        }
    }

    fn unknown() -> Self {
        Self {
            kind: EntityKind::Unknown,
            track_id: None,
            album_id: None,
            access_key: None,
        }
    }

    fn with_key(mut self, key: Option<String>) -> Self {
        self.access_key = key;
        self
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn segment_after<'a>(segments: &[&'a str], marker: &str) -> Option<&'a str> {
    let idx = segments.iter().position(|s| *s == marker)?;
    segments.get(idx + 1).copied()
}

fn parse_yandex(segments: &[&str]) -> Option<ParsedIds> {
    if segments.contains(&"album") {
        let album_id = segment_after(segments, "album");
        if segments.contains(&"track") {
            let track_id = segment_after(segments, "track");
            return Some(ParsedIds {
                kind: EntityKind::Track,
                track_id: track_id.map(str::to_string),
                album_id: album_id.map(str::to_string),
                access_key: None,
            });
        }
        return Some(ParsedIds {
            kind: EntityKind::Album,
            track_id: None,
            album_id: album_id.map(str::to_string),
            access_key: None,
        });
    }
    match segments {
        ["track", id, ..] => Some(ParsedIds::track(id)),
        _ => None,
    }
}

fn parse_mts(host: &str, segments: &[&str]) -> Option<ParsedIds> {
    if host.contains("onelink.me") {
        return Some(ParsedIds::unknown());
    }
    if !host.contains("music.mts.ru") {
        return None;
    }
    match segments {
        ["track", id, ..] => Some(ParsedIds::track(id)),
        ["album", id, ..] => Some(ParsedIds::album(id)),
        _ => None,
    }
}

fn parse_zvuk(segments: &[&str]) -> Option<ParsedIds> {
    match segments {
        ["track" | "song", id, ..] => Some(ParsedIds::track(id)),
        ["release" | "album", id, ..] => Some(ParsedIds::album(id)),
        _ => None,
    }
}

fn parse_spotify(segments: &[&str]) -> Option<ParsedIds> {
    let segments = match segments {
        [first, rest @ ..] if first.starts_with("intl-") => rest,
        _ => segments,
    };
    match segments {
        ["track", id, ..] => Some(ParsedIds::track(id)),
        ["album", id, ..] => Some(ParsedIds::album(id)),
        _ => None,
    }
}

fn parse_shazam(segments: &[&str]) -> Option<ParsedIds> {
    match segments {
        ["track" | "song", id, ..] => Some(ParsedIds::track(id)),
        _ => None,
    }
}

fn parse_ytmusic(url: &Url, segments: &[&str]) -> Option<ParsedIds> {
    match segments {
        ["watch", ..] => query_param(url, "v").map(|v| ParsedIds::track(&v)),
        ["playlist", ..] => query_param(url, "list").map(|l| ParsedIds::album(&l)),
        ["browse", id, ..] => Some(ParsedIds::album(id)),
        _ => None,
    }
}

fn parse_apple(url: &Url, segments: &[&str]) -> Option<ParsedIds> {
    let kind_idx = segments
        .iter()
        .position(|s| matches!(*s, "album" | "song"))?;
    let id = segments[kind_idx + 1..]
        .iter()
        .rev()
        .find(|s| s.chars().all(|c| c.is_ascii_digit()))?;
    if segments[kind_idx] == "song" {
        return Some(ParsedIds::track(id));
    }
    match query_param(url, "i") {
        Some(track) => Some(ParsedIds {
            kind: EntityKind::Track,
            track_id: Some(track),
            album_id: Some(id.to_string()),
            access_key: None,
        }),
        None => Some(ParsedIds::album(id)),
    }
}

/// Split `owner_item[_key]` into the `owner_item` id and an optional key.
fn vk_owner_item(raw: &str) -> Option<(String, Option<String>)> {
    let parts: Vec<&str> = raw.split('_').filter(|p| !p.is_empty()).collect();
    if parts.len() < 2 {
        return None;
    }
    let key = parts.get(2).map(|k| k.to_string());
    Some((format!("{}_{}", parts[0], parts[1]), key))
}

fn vk_audio_id(raw: &str) -> Option<(String, Option<String>)> {
    let value = raw
        .strip_prefix("audio_playlist")
        .or_else(|| raw.strip_prefix("audio"))
        .unwrap_or(raw);
    vk_owner_item(value)
}

fn vk_playlist_id(raw: &str) -> Option<(String, Option<String>)> {
    let value = match raw.split_once("audio_playlist") {
        Some((_, rest)) => rest,
        None => raw,
    };
    vk_owner_item(value)
}

fn vk_album(raw: &str) -> Option<ParsedIds> {
    let (id, key) = vk_playlist_id(raw)?;
    Some(ParsedIds::album(&id).with_key(key))
}

fn vk_track(raw: &str) -> Option<ParsedIds> {
    let (id, key) = vk_audio_id(raw)?;
    Some(ParsedIds::track(&id).with_key(key))
}

/// VK and BOOM links. `None` means "not a music link" so the caller does not
/// classify arbitrary VK pages as music.
fn parse_vk(url: &Url, host: &str, segments: &[&str]) -> Option<ParsedIds> {
    if let Some(act) = query_param(url, "act") {
        if act.starts_with("audio_playlist") {
            return vk_album(&act);
        }
        if act.starts_with("audio") {
            return vk_track(&act);
        }
    }

    if let Some(first) = segments.first() {
        if first.starts_with("audio_playlist") {
            return vk_album(first);
        }
        if first.starts_with("audio") {
            return vk_track(first);
        }
    }

    if let ["music", "album" | "playlist", raw, ..] = segments {
        return vk_album(raw);
    }

    let z_param = query_param(url, "z");
    for seg in segments {
        if seg.starts_with("audio_playlist") {
            return vk_album(seg);
        }
        if *seg == "music" {
            if let Some(z) = z_param.as_deref().filter(|z| z.contains("audio_playlist")) {
                return vk_album(z);
            }
        }
    }

    if host.starts_with("share.boom.ru") {
        return match segments {
            ["track", id, ..] => Some(ParsedIds::track(id)),
            ["album", id, ..] => Some(ParsedIds::album(id)),
            _ => None,
        };
    }
    None
}
