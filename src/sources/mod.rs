pub mod apple;
pub mod mts;
pub mod og;
pub mod spotify;
pub mod vk;
pub mod yandex;
pub mod ytmusic;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Deserializer};

use crate::config::Config;
use crate::core::text::{year_from_number, year_from_str};
use crate::error::ResolveError;
use crate::models::{CanonicalEntity, CatalogCandidate, EntityKind, Service};

/// Social-preview tags scraped from a page, plus where redirects ended up.
#[derive(Debug, Clone, Default)]
pub struct SocialTags {
    pub tags: BTreeMap<String, String>,
    pub final_url: String,
}

/// Fetches the social-preview tags of a page.
pub trait TagFetcher {
    fn fetch(&self, url: &str) -> std::result::Result<SocialTags, ResolveError>;
}

/// A streaming service catalog.
///
/// Implementations never fail: any network or payload error is logged and
/// reported as "no results".
pub trait CatalogSource {
    fn service(&self) -> Service;
    /// Free-text search for tracks or albums.
    fn search(&self, query: &str, kind: EntityKind) -> Vec<CatalogCandidate>;
    /// Direct lookup of an entity of this service by its ids.
    fn lookup(&self, entity: &CanonicalEntity) -> Option<CatalogCandidate>;
}

/// Nullable per-service tokens. A missing token only disables lookups.
pub trait CredentialProvider {
    fn credential(&self, service: Service) -> Option<String>;
}

/// The set of catalogs a resolution may query, at most one per service.
#[derive(Default)]
pub struct Catalogs {
    sources: Vec<Box<dyn CatalogSource>>,
}

impl Catalogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Box<dyn CatalogSource>) {
        let service = source.service();
        self.sources.retain(|s| s.service() != service);
        self.sources.push(source);
    }

    pub fn get(&self, service: Service) -> Option<&dyn CatalogSource> {
        self.sources
            .iter()
            .find(|s| s.service() == service)
            .map(|s| s.as_ref())
    }

    pub fn contains(&self, service: Service) -> bool {
        self.get(service).is_some()
    }

    pub fn services(&self) -> Vec<Service> {
        self.sources.iter().map(|s| s.service()).collect()
    }

    /// Build every client the configuration allows. Clients that cannot
    /// start (e.g. Spotify without credentials) are left out.
    pub fn from_config(config: &Config) -> Self {
        let mut catalogs = Self::new();
        let mut add = |name: &str, built: Result<Box<dyn CatalogSource>>| match built {
            Ok(source) => catalogs.register(source),
            Err(e) => info!("{} отключён: {:#}", name, e),
        };

        add("Yandex", yandex::YandexClient::new(config).map(boxed));
        add("MTS", mts::MtsClient::new(config).map(boxed));
        add("VK", vk::VkClient::new(config).map(boxed));
        add("YouTube Music", ytmusic::YtMusicClient::new(config).map(boxed));
        add("Apple Music", apple::AppleClient::new(config).map(boxed));
        if config.spotify.is_configured() {
            add("Spotify", spotify::SpotifyClient::new(config).map(boxed));
        } else {
            info!("Spotify не настроен, пропускаю");
        }
        catalogs
    }
}

fn boxed<S: CatalogSource + 'static>(source: S) -> Box<dyn CatalogSource> {
    Box::new(source)
}

/// Collaborator boundary: turn a failed call into an empty result.
pub(crate) fn or_empty<T: Default>(service: Service, what: &str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!("{}: {} не удался: {:#}", service, what, e);
            T::default()
        }
    }
}

/// Blocking client shared by the catalog implementations.
pub(crate) fn http_client(config: &Config, proxy: Option<&str>) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder()
        .user_agent(config.http.user_agent())
        .timeout(config.http.timeout());
    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy).context("некорректный адрес прокси")?);
    }
    builder.build().context("не удалось создать HTTP-клиент")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Catalog ids arrive as numbers or strings depending on the endpoint.
pub(crate) fn de_opt_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawScalar>::deserialize(deserializer)?;
    Ok(raw
        .map(|r| match r {
            RawScalar::Int(n) => n.to_string(),
            RawScalar::Float(f) => format!("{}", f as i64),
            RawScalar::Text(s) => s.trim().to_string(),
        })
        .filter(|s| !s.is_empty()))
}

/// Year as a number, a Unix timestamp or a date string.
pub(crate) fn de_opt_year<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawScalar>::deserialize(deserializer)?;
    Ok(raw.and_then(|r| match r {
        RawScalar::Int(n) => year_from_number(n),
        RawScalar::Float(f) => year_from_number(f as i64),
        RawScalar::Text(s) => year_from_str(&s),
    }))
}

/// Names from a list of artist objects, skipping blanks.
pub(crate) fn artist_names<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<&'a String>>,
{
    names
        .into_iter()
        .flatten()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}
