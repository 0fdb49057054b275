//! Turns one shared link into a [`MetadataRecord`] with cross-service links.
//!
//! Collaborators are injected: a [`TagFetcher`] for the seed page and a
//! [`Catalogs`] set for lookups and searches. Services are visited in a
//! fixed order and every step is sequential, so the same inputs always give
//! the same record.

use log::{debug, info, warn};

use crate::core::canonical::{canonicalize, direct_url, is_boom_share, is_non_music_link};
use crate::core::matcher::{best_match, MatchQuery};
use crate::core::merge::{apply_core_fields, apply_image, seed_record};
use crate::core::text::strip_noise;
use crate::error::{ResolveError, Result};
use crate::models::{CanonicalEntity, CatalogCandidate, EntityKind, LinkState, MetadataRecord, Service};
use crate::sources::{CatalogSource, Catalogs, SocialTags, TagFetcher};

/// Order in which foreign catalogs are searched. Earlier services also win
/// metadata conflicts among search matches.
pub const RESOLUTION_ORDER: [Service; 6] = [
    Service::Yandex,
    Service::Mts,
    Service::Vk,
    Service::Spotify,
    Service::Ytmusic,
    Service::Apple,
];

pub struct Resolver<'a> {
    fetcher: &'a dyn TagFetcher,
    catalogs: &'a Catalogs,
}

impl<'a> Resolver<'a> {
    pub fn new(fetcher: &'a dyn TagFetcher, catalogs: &'a Catalogs) -> Self {
        Self { fetcher, catalogs }
    }

    /// Full pipeline: fetch, seed, enrich.
    pub fn resolve_url(&self, url: &str) -> Result<MetadataRecord> {
        let url = url.trim();
        if is_non_music_link(url) {
            return Err(ResolveError::NotMusic(url.to_string()));
        }

        let source = canonicalize(url);
        let page = match self.fetcher.fetch(url) {
            Ok(page) => page,
            Err(e) if self.catalogs.contains(source.service) && source.has_ids() => {
                warn!("{}; продолжаю по идентификаторам из ссылки", e);
                SocialTags::default()
            }
            Err(e) => return Err(e),
        };

        let resolved = Some(page.final_url.as_str()).filter(|u| !u.is_empty());
        let mut record = seed_record(url, resolved, page.tags);
        info!(
            "{} {} {}: {}",
            record.entity.service,
            record.entity.kind,
            record.entity.track_id.as_deref().or(record.entity.album_id.as_deref()).unwrap_or("-"),
            record.summary()
        );

        self.resolve(&mut record);
        Ok(record)
    }

    /// Enrichment of a seeded record: own lookup, then every other catalog.
    /// Services already marked found or not found are left alone.
    pub fn resolve(&self, record: &mut MetadataRecord) {
        let source = record.entity.service;
        let boom = is_boom_share(&record.source_url);
        let mut covers: Vec<Option<String>> = Vec::new();

        if source != Service::Unknown && !boom && !record.link(source).is_settled() {
            record.set_link(source, LinkState::Found(record.source_url.clone()));
        }

        if !boom {
            covers.push(self.source_lookup(record));
        }

        for target in RESOLUTION_ORDER {
            let Some(catalog) = self.catalogs.get(target) else {
                continue;
            };
            if record.link(target).is_settled() {
                continue;
            }

            if let Some((url, found)) = self.shared_catalog_match(record, target, catalog) {
                info!("{}: найдено по общему каталогу: {}", target, url);
                record.set_link(target, LinkState::Found(url));
                covers.push(fold_candidate(record, &found, false));
                continue;
            }

            match self.search_match(record, catalog).and_then(|c| Some((c.url.clone()?, c))) {
                Some((url, found)) => {
                    info!("{}: {}", target, url);
                    record.set_link(target, LinkState::Found(url));
                    covers.push(fold_candidate(record, &found, false));
                }
                None => {
                    info!("{}: не найдено", target);
                    record.set_link(target, LinkState::NotFound);
                }
            }
        }

        apply_image(record, covers.iter().map(|c| c.as_deref()));
    }

    /// The source service's own API wins over the scraped tags. Returns the
    /// cover it reported.
    fn source_lookup(&self, record: &mut MetadataRecord) -> Option<String> {
        let catalog = self.catalogs.get(record.entity.service)?;
        if !record.entity.has_ids() {
            return None;
        }
        let Some(found) = catalog.lookup(&record.entity) else {
            debug!("{}: собственный поиск ничего не дал", record.entity.service);
            return None;
        };
        let cover = fold_candidate(record, &found, true);

        let entity = &mut record.entity;
        if entity.kind.is_album() {
            if entity.album_id.is_none() {
                entity.album_id = found.id.clone();
            }
        } else {
            if entity.track_id.is_none() {
                entity.track_id = found.id.clone();
            }
            if entity.album_id.is_none() {
                entity.album_id = found.album_id.clone();
            }
        }
        cover
    }

    /// Yandex and MTS share catalog ids: derive the target entity from the
    /// source ids or the partner's link and confirm it exists.
    fn shared_catalog_match(
        &self,
        record: &MetadataRecord,
        target: Service,
        catalog: &dyn CatalogSource,
    ) -> Option<(String, CatalogCandidate)> {
        let partner = target.shared_catalog_partner()?;
        let ids = if record.entity.service == partner && record.entity.has_ids() {
            record.entity.clone()
        } else {
            let linked = canonicalize(record.link(partner).url()?);
            if linked.service != partner || !linked.has_ids() {
                return None;
            }
            linked
        };
        let candidate = CanonicalEntity {
            kind: shared_kind(&ids),
            ..ids.retarget(target)
        };

        let found = catalog.lookup(&candidate)?;
        let url = found.url.clone().or_else(|| direct_url(&candidate))?;
        Some((url, found))
    }

    fn search_match(&self, record: &MetadataRecord, catalog: &dyn CatalogSource) -> Option<CatalogCandidate> {
        let title = record.base_title()?.to_string();
        let kind = record.entity.kind;
        let query = MatchQuery {
            title,
            artist: record.artist.clone(),
            album: if kind.is_album() { None } else { record.album.clone() },
            kind,
        };

        let search_kind = if kind.is_album() { EntityKind::Album } else { EntityKind::Track };
        let candidates = search_ladder(catalog, &query, search_kind);
        if !candidates.is_empty() {
            return best_match(&query, &candidates).cloned();
        }
        if !kind.is_album() {
            return None;
        }

        // No album results at all: albums of matching tracks.
        debug!("{}: альбомов нет, ищу среди треков", catalog.service());
        let parents: Vec<CatalogCandidate> = search_ladder(catalog, &query, EntityKind::Track)
            .iter()
            .filter_map(CatalogCandidate::parent_album)
            .filter(|a| a.url.is_some())
            .collect();
        best_match(&query, &parents).cloned()
    }
}

/// Fold a catalog entry into the record; returns its image for the final
/// image choice.
fn fold_candidate(record: &mut MetadataRecord, found: &CatalogCandidate, overwrite: bool) -> Option<String> {
    let fragment = found.to_fragment(record.entity.kind);
    apply_core_fields(record, &fragment, overwrite);
    fragment.image
}

/// A track inside an album is looked up as a track.
fn shared_kind(ids: &CanonicalEntity) -> EntityKind {
    match ids.kind {
        EntityKind::Unknown if ids.track_id.is_some() => EntityKind::Track,
        EntityKind::Unknown => EntityKind::Album,
        kind => kind,
    }
}

/// Query strings from most to least specific, duplicates removed.
pub fn query_ladder(query: &MatchQuery) -> Vec<String> {
    let title = query.title.trim();
    let mut rungs = Vec::new();
    if let Some(artist) = query.artist.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        rungs.push(format!("{} {}", title, artist));
    }
    rungs.push(title.to_string());
    rungs.push(strip_noise(title));

    let mut unique: Vec<String> = Vec::new();
    for rung in rungs {
        if !rung.trim().is_empty() && !unique.contains(&rung) {
            unique.push(rung);
        }
    }
    unique
}

/// Each rung runs only if the previous one returned nothing.
fn search_ladder(catalog: &dyn CatalogSource, query: &MatchQuery, kind: EntityKind) -> Vec<CatalogCandidate> {
    for rung in query_ladder(query) {
        let found = catalog.search(&rung, kind);
        debug!("{}: «{}» ({}) -> {} кандидатов", catalog.service(), rung, kind, found.len());
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    type CallLog = Rc<RefCell<Vec<String>>>;

    struct FakeFetcher {
        tags: Option<Vec<(&'static str, &'static str)>>,
    }

    impl TagFetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> Result<SocialTags> {
            match &self.tags {
                Some(pairs) => Ok(SocialTags {
                    tags: pairs
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                    final_url: url.to_string(),
                }),
                None => Err(ResolveError::Fetch {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                }),
            }
        }
    }

    struct CaptchaFetcher;

    impl TagFetcher for CaptchaFetcher {
        fn fetch(&self, url: &str) -> Result<SocialTags> {
            Err(ResolveError::Captcha {
                url: format!("https://music.yandex.ru/showcaptcha?retpath={}", url),
            })
        }
    }

    struct FakeCatalog {
        service: Service,
        tracks: Vec<CatalogCandidate>,
        albums: Vec<CatalogCandidate>,
        lookup: Option<CatalogCandidate>,
        calls: CallLog,
    }

    impl FakeCatalog {
        fn new(service: Service, calls: &CallLog) -> Self {
            Self {
                service,
                tracks: Vec::new(),
                albums: Vec::new(),
                lookup: None,
                calls: Rc::clone(calls),
            }
        }

        fn tracks(mut self, tracks: Vec<CatalogCandidate>) -> Self {
            self.tracks = tracks;
            self
        }

        fn albums(mut self, albums: Vec<CatalogCandidate>) -> Self {
            self.albums = albums;
            self
        }

        fn lookup(mut self, found: CatalogCandidate) -> Self {
            self.lookup = Some(found);
            self
        }
    }

    impl CatalogSource for FakeCatalog {
        fn service(&self) -> Service {
            self.service
        }

        fn search(&self, query: &str, kind: EntityKind) -> Vec<CatalogCandidate> {
            self.calls
                .borrow_mut()
                .push(format!("{}:search:{}:{}", self.service, kind, query));
            if kind.is_album() {
                self.albums.clone()
            } else {
                self.tracks.clone()
            }
        }

        fn lookup(&self, entity: &CanonicalEntity) -> Option<CatalogCandidate> {
            self.calls.borrow_mut().push(format!(
                "{}:lookup:{}",
                self.service,
                entity.track_id.as_deref().or(entity.album_id.as_deref()).unwrap_or("-")
            ));
            self.lookup.clone()
        }
    }

    fn track(title: &str, artist: &str, url: &str) -> CatalogCandidate {
        CatalogCandidate {
            id: Some(url.rsplit('/').next().unwrap_or_default().to_string()),
            title: Some(title.to_string()),
            artists: vec![artist.to_string()],
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    fn calls_for(calls: &CallLog, prefix: &str) -> Vec<String> {
        calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    #[test]
    fn test_source_lookup_fails_but_search_succeeds() {
        let calls = CallLog::default();
        let fetcher = FakeFetcher {
            tags: Some(vec![
                ("og:title", "Life"),
                ("og:description", "Zivert • Vinyl #1 • 2019"),
            ]),
        };
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(FakeCatalog::new(Service::Yandex, &calls)));
        catalogs.register(Box::new(
            FakeCatalog::new(Service::Spotify, &calls)
                .tracks(vec![track("Life", "Zivert", "https://open.spotify.com/track/sp1")]),
        ));
        catalogs.register(Box::new(
            FakeCatalog::new(Service::Vk, &calls)
                .tracks(vec![track("Life", "Zivert", "https://vk.com/audio-1_2")]),
        ));
        catalogs.register(Box::new(
            FakeCatalog::new(Service::Apple, &calls)
                .tracks(vec![track("Life", "Metallica", "https://music.apple.com/x")]),
        ));

        let resolver = Resolver::new(&fetcher, &catalogs);
        let record = resolver
            .resolve_url("https://music.yandex.ru/album/4766246/track/33311009")
            .unwrap();

        assert_eq!(record.title.as_deref(), Some("Life"));
        assert_eq!(record.artist.as_deref(), Some("Zivert"));
        assert_eq!(record.album.as_deref(), Some("Vinyl #1"));
        assert_eq!(
            record.link(Service::Spotify),
            &LinkState::Found("https://open.spotify.com/track/sp1".to_string())
        );
        assert_eq!(
            record.link(Service::Vk),
            &LinkState::Found("https://vk.com/audio-1_2".to_string())
        );
        assert_eq!(record.link(Service::Apple), &LinkState::NotFound);
        assert_eq!(record.link(Service::Mts), &LinkState::Unresolved);
        assert_eq!(
            record.link(Service::Yandex).url(),
            Some("https://music.yandex.ru/album/4766246/track/33311009")
        );
        assert_eq!(calls_for(&calls, "yandex:search"), Vec::<String>::new());
    }

    #[test]
    fn test_fetch_failure_without_catalog_is_fatal() {
        let calls = CallLog::default();
        let fetcher = FakeFetcher { tags: None };
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(FakeCatalog::new(Service::Spotify, &calls)));

        let resolver = Resolver::new(&fetcher, &catalogs);
        let err = resolver
            .resolve_url("https://music.yandex.ru/album/1/track/2")
            .unwrap_err();
        assert!(matches!(err, ResolveError::Fetch { .. }));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_fetch_failure_falls_back_to_ids() {
        let calls = CallLog::default();
        let fetcher = FakeFetcher { tags: None };
        let mut found = track("Life", "Zivert", "https://music.yandex.ru/album/1/track/2");
        found.album = Some("Vinyl #1".to_string());
        found.album_id = Some("1".to_string());
        found.cover = Some("https://avatars/1000x1000".to_string());
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(FakeCatalog::new(Service::Yandex, &calls).lookup(found)));

        let resolver = Resolver::new(&fetcher, &catalogs);
        let record = resolver.resolve_url("https://music.yandex.ru/album/1/track/2").unwrap();
        assert_eq!(record.title.as_deref(), Some("Life"));
        assert_eq!(record.album.as_deref(), Some("Vinyl #1"));
        assert_eq!(record.image.as_deref(), Some("https://avatars/1000x1000"));
    }

    #[test]
    fn test_not_music_link_is_rejected() {
        let fetcher = FakeFetcher { tags: Some(Vec::new()) };
        let catalogs = Catalogs::new();
        let resolver = Resolver::new(&fetcher, &catalogs);
        let err = resolver.resolve_url("https://vk.com/id1").unwrap_err();
        assert!(matches!(err, ResolveError::NotMusic(_)));
    }

    #[test]
    fn test_shared_catalog_short_circuit() {
        let calls = CallLog::default();
        let fetcher = FakeFetcher {
            tags: Some(vec![("og:title", "Life"), ("music:musician", "Zivert")]),
        };
        let mts_found = track("Life", "Zivert", "https://music.mts.ru/track/33311009");
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(FakeCatalog::new(Service::Mts, &calls).lookup(mts_found)));

        let resolver = Resolver::new(&fetcher, &catalogs);
        let record = resolver
            .resolve_url("https://music.yandex.ru/album/4766246/track/33311009")
            .unwrap();
        assert_eq!(
            record.link(Service::Mts).url(),
            Some("https://music.mts.ru/track/33311009")
        );
        assert_eq!(calls_for(&calls, "mts:lookup"), vec!["mts:lookup:33311009".to_string()]);
        assert!(calls_for(&calls, "mts:search").is_empty());
    }

    #[test]
    fn test_settled_links_are_not_retried() {
        let calls = CallLog::default();
        let fetcher = FakeFetcher { tags: Some(Vec::new()) };
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(
            FakeCatalog::new(Service::Vk, &calls)
                .tracks(vec![track("Life", "Zivert", "https://vk.com/audio-1_2")]),
        ));
        catalogs.register(Box::new(
            FakeCatalog::new(Service::Spotify, &calls)
                .tracks(vec![track("Life", "Zivert", "https://open.spotify.com/track/sp1")]),
        ));
        let resolver = Resolver::new(&fetcher, &catalogs);

        let mut record = MetadataRecord {
            title: Some("Life".to_string()),
            artist: Some("Zivert".to_string()),
            source_url: "https://example.com/".to_string(),
            ..Default::default()
        };
        record.set_link(Service::Vk, LinkState::NotFound);
        record.set_link(Service::Spotify, LinkState::Found("https://open.spotify.com/track/old".to_string()));
        resolver.resolve(&mut record);

        assert!(calls.borrow().is_empty());
        assert_eq!(record.link(Service::Vk), &LinkState::NotFound);
        assert_eq!(
            record.link(Service::Spotify).url(),
            Some("https://open.spotify.com/track/old")
        );
    }

    #[test]
    fn test_album_falls_back_to_parent_albums() {
        let calls = CallLog::default();
        let fetcher = FakeFetcher {
            tags: Some(vec![("og:title", "Партизан"), ("music:musician", "Хаски")]),
        };
        let mut song = track("Пуля-дура", "Хаски", "https://open.spotify.com/track/t1");
        song.album = Some("Партизан".to_string());
        song.album_id = Some("a1".to_string());
        song.album_url = Some("https://open.spotify.com/album/a1".to_string());
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(FakeCatalog::new(Service::Spotify, &calls).tracks(vec![song])));

        let resolver = Resolver::new(&fetcher, &catalogs);
        let record = resolver.resolve_url("https://music.yandex.ru/album/3192570").unwrap();
        assert_eq!(record.entity.kind, EntityKind::Album);
        assert_eq!(
            record.link(Service::Spotify).url(),
            Some("https://open.spotify.com/album/a1")
        );
        // Three album rungs collapse to two distinct queries, then tracks.
        let searches = calls_for(&calls, "spotify:search");
        assert_eq!(
            searches,
            vec![
                "spotify:search:album:Партизан Хаски".to_string(),
                "spotify:search:album:Партизан".to_string(),
                "spotify:search:track:Партизан Хаски".to_string(),
            ]
        );
    }

    #[test]
    fn test_album_search_prefers_album_results() {
        let calls = CallLog::default();
        let fetcher = FakeFetcher {
            tags: Some(vec![("og:title", "Партизан"), ("music:musician", "Хаски")]),
        };
        let albums = vec![
            track("Партизан (Deluxe)", "Хаски", "https://open.spotify.com/album/deluxe"),
            track("Другое", "Кто-то", "https://open.spotify.com/album/other"),
        ];
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(FakeCatalog::new(Service::Spotify, &calls).albums(albums)));

        let resolver = Resolver::new(&fetcher, &catalogs);
        let record = resolver.resolve_url("https://music.yandex.ru/album/3192570").unwrap();
        assert_eq!(
            record.link(Service::Spotify).url(),
            Some("https://open.spotify.com/album/deluxe")
        );
        assert_eq!(calls_for(&calls, "spotify:search").len(), 1);
    }

    #[test]
    fn test_image_priority() {
        let calls = CallLog::default();
        let fetcher = FakeFetcher {
            tags: Some(vec![("og:title", "Life"), ("music:musician", "Zivert")]),
        };
        let mut own = track("Life", "Zivert", "https://music.yandex.ru/track/2");
        own.cover = Some("https://own/cover".to_string());
        let mut aggregated = track("Life", "Zivert", "https://open.spotify.com/track/sp1");
        aggregated.cover = Some("https://spotify/cover".to_string());
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(FakeCatalog::new(Service::Yandex, &calls).lookup(own)));
        catalogs.register(Box::new(FakeCatalog::new(Service::Spotify, &calls).tracks(vec![aggregated])));

        let resolver = Resolver::new(&fetcher, &catalogs);
        let record = resolver.resolve_url("https://music.yandex.ru/track/2").unwrap();
        assert_eq!(record.image.as_deref(), Some("https://own/cover"));
    }

    #[test]
    fn test_page_image_beats_own_lookup_cover() {
        let calls = CallLog::default();
        let fetcher = FakeFetcher {
            tags: Some(vec![
                ("og:title", "Life"),
                ("music:musician", "Zivert"),
                ("og:image", "https://og/cover"),
            ]),
        };
        let mut own = track("Life", "Zivert", "https://music.yandex.ru/track/2");
        own.cover = Some("https://own/cover".to_string());
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(FakeCatalog::new(Service::Yandex, &calls).lookup(own)));

        let resolver = Resolver::new(&fetcher, &catalogs);
        let record = resolver.resolve_url("https://music.yandex.ru/track/2").unwrap();
        assert_eq!(record.image.as_deref(), Some("https://og/cover"));
    }

    #[test]
    fn test_captcha_without_catalog_is_fatal() {
        let calls = CallLog::default();
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(FakeCatalog::new(Service::Spotify, &calls)));

        let resolver = Resolver::new(&CaptchaFetcher, &catalogs);
        let err = resolver
            .resolve_url("https://music.yandex.ru/album/1/track/2")
            .unwrap_err();
        assert!(matches!(err, ResolveError::Captcha { .. }));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_captcha_falls_back_to_ids() {
        let calls = CallLog::default();
        let mut found = track("Life", "Zivert", "https://music.yandex.ru/album/1/track/2");
        found.album = Some("Vinyl #1".to_string());
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(FakeCatalog::new(Service::Yandex, &calls).lookup(found)));

        let resolver = Resolver::new(&CaptchaFetcher, &catalogs);
        let record = resolver.resolve_url("https://music.yandex.ru/album/1/track/2").unwrap();
        assert_eq!(record.title.as_deref(), Some("Life"));
        assert_eq!(record.album.as_deref(), Some("Vinyl #1"));
        assert_eq!(calls_for(&calls, "yandex:lookup"), vec!["yandex:lookup:2".to_string()]);
    }

    #[test]
    fn test_query_ladder() {
        let query = MatchQuery {
            title: "Life (Radio Edit)".to_string(),
            artist: Some("Zivert".to_string()),
            album: None,
            kind: EntityKind::Track,
        };
        assert_eq!(
            query_ladder(&query),
            vec![
                "Life (Radio Edit) Zivert".to_string(),
                "Life (Radio Edit)".to_string(),
                "Life".to_string(),
            ]
        );
    }
}
