//! Fuzzy matching of a query against candidates from a foreign catalog.
//!
//! Scoring: 2 points for the title gate, 2 for the artist gate, 1 bonus when
//! album names cross-contain (track queries only). Failing either gate
//! rejects the candidate outright, so a missing match is always preferred
//! over a wrong one. A query without an artist passes the artist gate.

use std::collections::HashSet;

use log::debug;

use crate::core::text::{consonant_skeleton, contains_relaxed, normalize, strip_noise, transliterate};
use crate::models::{CatalogCandidate, EntityKind};

const GATE_POINTS: u32 = 2;
const ALBUM_BONUS: u32 = 1;
const TOKEN_OVERLAP_RATIO: f64 = 0.75;
const MIN_SKELETON_LEN: usize = 3;

/// What we know about the entity we are looking for.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub kind: EntityKind,
}

/// Query strings normalized once, reused across candidates.
struct PreparedQuery {
    title: String,
    title_alt: String,
    artist: Option<String>,
    /// Empty for album queries: their title already is the album name.
    album: String,
}

impl PreparedQuery {
    fn new(query: &MatchQuery) -> Self {
        let title = normalize(&query.title);
        let title_alt = normalize(&strip_noise(&query.title));
        let artist = query
            .artist
            .as_deref()
            .map(normalize)
            .filter(|a| !a.is_empty());
        let album = if query.kind.is_album() {
            String::new()
        } else {
            query.album.as_deref().map(normalize).unwrap_or_default()
        };
        Self {
            title,
            title_alt,
            artist,
            album,
        }
    }
}

/// Best candidate for the query, or `None` when nothing passes both gates.
/// Ties keep the earliest candidate.
pub fn best_match<'a>(query: &MatchQuery, candidates: &'a [CatalogCandidate]) -> Option<&'a CatalogCandidate> {
    let prepared = PreparedQuery::new(query);
    let mut best: Option<&CatalogCandidate> = None;
    let mut best_score = 0;

    for candidate in candidates {
        let score = score_prepared(&prepared, candidate);
        debug!("score {} for {}", score, candidate.summary());
        if score > best_score {
            best_score = score;
            best = Some(candidate);
        }
    }
    best
}

fn score_prepared(query: &PreparedQuery, candidate: &CatalogCandidate) -> u32 {
    let cand_title = normalize(candidate.title.as_deref().unwrap_or_default());
    let title_ok = contains_relaxed(&query.title, &cand_title)
        || (query.title_alt != query.title && contains_relaxed(&query.title_alt, &cand_title));
    if !title_ok {
        return 0;
    }

    if let Some(artist) = &query.artist {
        let cand_artists = candidate
            .artists
            .iter()
            .map(|a| normalize(a))
            .filter(|a| !a.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !artist_match_relaxed(artist, &cand_artists) {
            return 0;
        }
    }

    let mut score = GATE_POINTS * 2;
    if !query.album.is_empty() {
        let cand_album = normalize(candidate.album.as_deref().unwrap_or_default());
        if contains_relaxed(&query.album, &cand_album) {
            score += ALBUM_BONUS;
        }
    }
    score
}

/// Increasingly permissive artist comparison; stops at the first hit.
pub fn artist_match_relaxed(query_artist: &str, candidate_artists: &str) -> bool {
    let q = normalize(query_artist);
    let c = normalize(candidate_artists);
    if q.is_empty() || c.is_empty() {
        return false;
    }

    if contains_relaxed(&q, &c) || token_overlap(&q, &c) {
        return true;
    }

    let q_lat = transliterate(&q);
    let c_lat = transliterate(&c);
    if contains_relaxed(&q_lat, &c_lat) || token_overlap(&q_lat, &c_lat) {
        return true;
    }

    if contains_relaxed(&soften(&q_lat), &soften(&c_lat)) {
        return true;
    }

    let q_sk = consonant_skeleton(&q_lat);
    let c_sk = consonant_skeleton(&c_lat);
    q_sk.chars().count() >= MIN_SKELETON_LEN
        && c_sk.chars().count() >= MIN_SKELETON_LEN
        && contains_relaxed(&q_sk, &c_sk)
}

/// "kh" and "h" both render Cyrillic "х"; collapse them.
fn soften(text: &str) -> String {
    text.replace("kh", "h")
}

/// At least 75% of the query tokens appear on the candidate side. Only
/// applies when both sides have two or more tokens.
fn token_overlap(query: &str, candidate: &str) -> bool {
    let q: HashSet<&str> = query.split_whitespace().collect();
    let c: HashSet<&str> = candidate.split_whitespace().collect();
    if q.len() < 2 || c.len() < 2 {
        return false;
    }
    let common = q.intersection(&c).count();
    common as f64 / q.len() as f64 >= TOKEN_OVERLAP_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(query: &MatchQuery, candidate: &CatalogCandidate) -> u32 {
        score_prepared(&PreparedQuery::new(query), candidate)
    }

    fn candidate(title: &str, artists: &[&str]) -> CatalogCandidate {
        CatalogCandidate {
            title: Some(title.to_string()),
            artists: artists.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    fn query(title: &str, artist: Option<&str>, kind: EntityKind) -> MatchQuery {
        MatchQuery {
            title: title.to_string(),
            artist: artist.map(str::to_string),
            album: None,
            kind,
        }
    }

    #[test]
    fn test_album_with_deluxe_suffix() {
        let q = query("Партизан", Some("Хаски"), EntityKind::Album);
        let candidates = vec![
            candidate("Партизан (Deluxe)", &["Хаски"]),
            candidate("Другое", &["Кто-то"]),
        ];
        let best = best_match(&q, &candidates).expect("match");
        assert_eq!(best.title.as_deref(), Some("Партизан (Deluxe)"));
    }

    #[test]
    fn test_transliterated_artist() {
        assert!(!contains_relaxed("хаски", "khaski"));
        assert!(artist_match_relaxed("Хаски", "Khaski"));
        let q = query("Пуля-дура", Some("Хаски"), EntityKind::Track);
        let candidates = vec![candidate("Пуля-дура", &["Khaski"])];
        assert!(best_match(&q, &candidates).is_some());
    }

    #[test]
    fn test_soft_h_variant() {
        assert!(artist_match_relaxed("Хаски", "Haski"));
    }

    #[test]
    fn test_token_overlap_needs_two_tokens() {
        assert!(artist_match_relaxed("Mumiy Troll Band", "Band Mumiy Troll"));
        assert!(!token_overlap("troll", "mumiy troll"));
    }

    #[test]
    fn test_consonant_skeleton_last_resort() {
        assert!(artist_match_relaxed("Oxxxymiron", "Oxxxymyron"));
    }

    #[test]
    fn test_zero_artist_overlap_never_matches() {
        let q = query("Life", Some("Zivert"), EntityKind::Track);
        let candidates = vec![
            candidate("Life", &["Metallica"]),
            candidate("Life (Remix)", &["Bon Jovi"]),
        ];
        assert!(best_match(&q, &candidates).is_none());
    }

    #[test]
    fn test_title_gate_rejects() {
        let q = query("Life", Some("Zivert"), EntityKind::Track);
        let candidates = vec![candidate("Беспонтовый пирожок", &["Zivert"])];
        assert!(best_match(&q, &candidates).is_none());
    }

    #[test]
    fn test_missing_artist_passes_gate() {
        let q = query("Партизан", None, EntityKind::Album);
        let candidates = vec![candidate("Партизан", &["Хаски"])];
        assert_eq!(score(&q, &candidates[0]), 4);
    }

    #[test]
    fn test_noise_stripped_query_title() {
        let q = query("Life (Radio Edit)", Some("Zivert"), EntityKind::Track);
        let candidates = vec![candidate("Life", &["Zivert"])];
        assert!(best_match(&q, &candidates).is_some());
    }

    #[test]
    fn test_album_bonus_and_tie_order() {
        let mut q = query("Life", Some("Zivert"), EntityKind::Track);
        q.album = Some("Vinyl #1".to_string());
        let mut first = candidate("Life", &["Zivert"]);
        first.album = Some("Life".to_string());
        let mut second = candidate("Life", &["Zivert"]);
        second.album = Some("Vinyl #1".to_string());
        let third = second.clone();
        let candidates = vec![first, second, third];
        assert_eq!(score(&q, &candidates[0]), 4);
        assert_eq!(score(&q, &candidates[1]), 5);
        let best = best_match(&q, &candidates).expect("match");
        assert!(std::ptr::eq(best, &candidates[1]));
    }

    #[test]
    fn test_album_query_ignores_album_bonus() {
        let mut q = query("Партизан", None, EntityKind::Album);
        q.album = Some("Партизан".to_string());
        let mut cand = candidate("Партизан", &["Хаски"]);
        cand.album = Some("Партизан".to_string());
        assert_eq!(score(&q, &cand), 4);
        q.kind = EntityKind::Track;
        assert_eq!(score(&q, &cand), 5);
    }

    #[test]
    fn test_short_skeletons_are_rejected() {
        assert_eq!(consonant_skeleton("ola"), "l");
        assert!(!artist_match_relaxed("Ola", "Ula"));
        assert!(!artist_match_relaxed("Ola", "Lolla"));
    }

    #[test]
    fn test_transliterated_token_overlap() {
        assert!(!contains_relaxed("мумий тролль", "troll mumiy"));
        assert!(!token_overlap("мумий тролль", "troll mumiy"));
        assert!(artist_match_relaxed("Мумий Тролль", "Troll Mumiy"));
    }

    #[test]
    fn test_token_overlap_ratio_boundary() {
        assert!(token_overlap("a b c d", "a b c x"));
        assert!(!token_overlap("a b c", "a b x"));
    }
}
