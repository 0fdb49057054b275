//! Text normalization used for catalog matching.
//!
//! Every function here is total: bad input degrades to an empty or unchanged
//! string, never to an error.

use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").unwrap());

/// Bracketed qualifier, e.g. "(Radio Edit)" or "[Live]".
static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[\(\[]([^\)\]]*)[\)\]]").unwrap());

static NOISE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(remix|re-mix|edit|live|remaster|remastered|version|mix|deluxe|edition|acoustic|instrumental|radio|extended|bonus|feat|ft|prod|sped up|slowed|ремикс|версия|ремастер|лайв)\b",
    )
    .unwrap()
});

static TRAILING_FEAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(feat\.?|ft\.?|featuring)\s+.*$").unwrap());

/// " - Something Remix" style suffix.
static DASH_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+[-–—]\s+([^-–—]+)$").unwrap());

const SEPARATORS: [&str; 4] = [" — ", " – ", " - ", ": "];

const VOWELS: &str = "aeiouy";

/// Case-fold, turn runs of non-word characters into one space, collapse
/// whitespace. `ё` folds to `е`, as catalogs disagree on it.
pub fn normalize(text: &str) -> String {
    let folded = text.to_lowercase().replace('ё', "е");
    let spaced = NON_WORD.replace_all(&folded, " ");
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cyrillic_to_latin(c: char) -> Option<&'static str> {
    let latin = match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' => "e",
        'ё' => "e",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'й' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "kh",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "shch",
        'ъ' => "",
        'ы' => "y",
        'ь' => "",
        'э' => "e",
        'ю' => "yu",
        'я' => "ya",
        'і' => "i",
        'ї' => "yi",
        'є' => "ye",
        'ґ' => "g",
        'ў' => "u",
        _ => return None,
    };
    Some(latin)
}

/// Cyrillic to Latin through a fixed table, then [`normalize`].
pub fn transliterate(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    for c in lower.chars() {
        match cyrillic_to_latin(c) {
            Some(latin) => out.push_str(latin),
            None => out.push(c),
        }
    }
    normalize(&out)
}

/// Drop remix/live/edition qualifiers and trailing "feat." clauses.
///
/// Returns the input unchanged when fewer than 3 characters would be left.
pub fn strip_noise(title: &str) -> String {
    let without_brackets = BRACKETED.replace_all(title, |caps: &regex::Captures| {
        if NOISE_MARKER.is_match(&caps[1]) {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    let without_feat = TRAILING_FEAT.replace(&without_brackets, "");
    let mut result = without_feat.trim().to_string();
    if let Some(caps) = DASH_SUFFIX.captures(&result) {
        if NOISE_MARKER.is_match(&caps[1]) {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(result.len());
            result.truncate(start);
        }
    }
    let result = result.trim();
    if result.chars().count() < 3 {
        return title.to_string();
    }
    result.to_string()
}

/// Letters and digits minus vowels, for heavily misspelled artist names.
/// Expects already transliterated input.
pub fn consonant_skeleton(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .filter(|c| !VOWELS.contains(*c))
        .collect()
}

/// `needle` inside `haystack`, or the reverse when the haystack is long
/// enough (at least 4 characters) to make truncation plausible.
pub fn contains_relaxed(needle: &str, haystack: &str) -> bool {
    if needle.is_empty() || haystack.is_empty() {
        return false;
    }
    if haystack.contains(needle) {
        return true;
    }
    haystack.chars().count() >= 4 && needle.contains(haystack)
}

/// Split "Artist - Title" on the first known separator.
pub fn split_artist_title(value: &str) -> (Option<String>, Option<String>) {
    let non_empty = |s: &str| {
        let s = s.trim();
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    };
    for sep in SEPARATORS {
        if let Some((left, right)) = value.split_once(sep) {
            return (non_empty(left), non_empty(right));
        }
    }
    (None, non_empty(value))
}

pub fn has_artist_title_separator(value: &str) -> bool {
    SEPARATORS.iter().any(|sep| value.contains(sep))
}

/// First segment that is exactly a 4-digit number.
pub fn pick_year<'a, I>(parts: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    parts.into_iter().map(str::trim).find_map(|p| {
        if p.chars().count() == 4 && p.chars().all(|c| c.is_ascii_digit()) {
            Some(p.to_string())
        } else {
            None
        }
    })
}

/// Year from a numeric field; values above 3000 are Unix timestamps.
pub fn year_from_number(value: i64) -> Option<String> {
    if value <= 0 {
        return None;
    }
    if value > 3000 {
        return chrono::DateTime::from_timestamp(value, 0).map(|dt| dt.year().to_string());
    }
    Some(value.to_string())
}

/// Year from a textual field: digits are treated like numbers, ISO dates
/// ("2020-05-01") keep their leading year, anything else is kept as is.
pub fn year_from_str(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        return value.parse::<i64>().ok().and_then(year_from_number);
    }
    let prefix: String = value.chars().take(4).collect();
    if prefix.chars().count() == 4 && prefix.chars().all(|c| c.is_ascii_digit()) {
        return Some(prefix);
    }
    Some(value.to_string())
}
