use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT_LANGUAGE, LOCATION};
use scraper::{Html, Selector};
use url::Url;

use crate::config::Config;
use crate::core::canonical::is_vk_host;
use crate::error::ResolveError;
use crate::models::Service;
use crate::sources::{SocialTags, TagFetcher};

const MAX_REDIRECTS: usize = 5;
const MAX_HEAD_BYTES: usize = 1_000_000;
const CHUNK: usize = 8192;
const TAG_PREFIXES: [&str; 4] = ["og:", "music:", "ya:", "vk:"];

/// Social-preview scraper.
///
/// Redirects are followed by hand so that a `Location` pointing at an app
/// scheme (`itms-apps://`, `intent://`) ends the chain instead of failing it.
/// Only the document head is downloaded.
pub struct OgFetcher {
    client: Client,
    dump_html: Option<PathBuf>,
}

impl OgFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let routes = ProxyRoutes::from_config(config)?;
        let mut builder = Client::builder()
            .user_agent(config.http.user_agent())
            .timeout(config.http.timeout())
            .redirect(reqwest::redirect::Policy::none());
        if routes.is_active() {
            builder = builder.proxy(reqwest::Proxy::custom(move |url| routes.route(url)));
        }
        let client = builder.build().context("не удалось создать HTTP-клиент для OG")?;
        Ok(Self {
            client,
            dump_html: None,
        })
    }

    /// Save the downloaded head of every page to `path`.
    pub fn with_dump(mut self, path: Option<PathBuf>) -> Self {
        self.dump_html = path;
        self
    }

    fn get(&self, url: &str) -> std::result::Result<Response, ResolveError> {
        self.client
            .get(url)
            .header(ACCEPT_LANGUAGE, "ru,en;q=0.9")
            .send()
            .map_err(|e| ResolveError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    fn follow_redirects(&self, url: &str) -> std::result::Result<Response, ResolveError> {
        let mut response = self.get(url)?;
        for _ in 0..MAX_REDIRECTS {
            if !response.status().is_redirection() {
                break;
            }
            let Some(next) = next_location(response.url(), &response) else {
                break;
            };
            debug!("редирект {} -> {}", response.url(), next);
            response = self.get(next.as_str())?;
        }
        Ok(response)
    }

    fn dump(&self, head: &[u8]) {
        if let Some(path) = &self.dump_html {
            if let Err(e) = std::fs::write(path, head) {
                warn!("не удалось сохранить HTML в {}: {}", path.display(), e);
            }
        }
    }
}

impl TagFetcher for OgFetcher {
    fn fetch(&self, url: &str) -> std::result::Result<SocialTags, ResolveError> {
        let response = self.follow_redirects(url)?;
        let response = response.error_for_status().map_err(|e| ResolveError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let final_url = response.url().to_string();
        if final_url.contains("showcaptcha") {
            return Err(ResolveError::Captcha { url: final_url });
        }

        let head = read_head(response).map_err(|e| ResolveError::Fetch {
            url: final_url.clone(),
            reason: e.to_string(),
        })?;
        if head.is_empty() {
            return Err(ResolveError::Parse(format!("{}: пустой ответ", final_url)));
        }
        self.dump(&head);

        let tags = extract_tags(&String::from_utf8_lossy(&head));
        debug!("{}: {} тегов", final_url, tags.len());
        Ok(SocialTags { tags, final_url })
    }
}

/// Where a redirect points, or `None` when the chain should stop here.
fn next_location(current: &Url, response: &Response) -> Option<Url> {
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    let next = match Url::parse(location) {
        Ok(absolute) => absolute,
        Err(url::ParseError::RelativeUrlWithoutBase) => current.join(location).ok()?,
        Err(_) => return None,
    };
    matches!(next.scheme(), "http" | "https").then_some(next)
}

/// Body bytes up to the end of `<head>` or the size cap.
fn read_head<R: Read>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; CHUNK];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let scan_from = buf.len().saturating_sub(5);
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() >= MAX_HEAD_BYTES {
            break;
        }
        if buf[scan_from..]
            .windows(6)
            .any(|w| w.eq_ignore_ascii_case(b"</head"))
        {
            break;
        }
    }
    Ok(buf)
}

/// `og:`, `music:`, `ya:` and `vk:` meta tags of a page. The first
/// occurrence of a property wins.
pub fn extract_tags(html: &str) -> BTreeMap<String, String> {
    let document = Html::parse_document(html);
    let meta_sel = Selector::parse("meta").unwrap();

    let mut tags = BTreeMap::new();
    for el in document.select(&meta_sel) {
        let attrs = el.value();
        let prop = attrs
            .attr("property")
            .or_else(|| attrs.attr("name"))
            .unwrap_or_default();
        if !TAG_PREFIXES.iter().any(|p| prop.starts_with(p)) {
            continue;
        }
        let Some(content) = attrs.attr("content") else {
            continue;
        };
        tags.entry(prop.to_string())
            .or_insert_with(|| content.trim().to_string());
    }
    tags
}

/// Per-service proxies for page fetches. Each slot already includes the
/// shared fallback.
struct ProxyRoutes {
    yandex: Option<Url>,
    vk: Option<Url>,
    mts: Option<Url>,
    fallback: Option<Url>,
}

impl ProxyRoutes {
    fn from_config(config: &Config) -> Result<Self> {
        let parse = |raw: Option<&str>| -> Result<Option<Url>> {
            raw.map(|r| Url::parse(r).with_context(|| format!("некорректный адрес прокси: {}", r)))
                .transpose()
        };
        Ok(Self {
            yandex: parse(config.proxy_for(Service::Yandex))?,
            vk: parse(config.proxy_for(Service::Vk))?,
            mts: parse(config.proxy_for(Service::Mts))?,
            fallback: parse(config.proxy_for(Service::Unknown))?,
        })
    }

    fn is_active(&self) -> bool {
        self.yandex.is_some() || self.vk.is_some() || self.mts.is_some() || self.fallback.is_some()
    }

    fn route(&self, url: &Url) -> Option<Url> {
        let host = url.host_str().unwrap_or_default().to_lowercase();
        let proxy = match proxy_service(&host) {
            Some(Service::Yandex) => self.yandex.as_ref(),
            Some(Service::Vk) => self.vk.as_ref(),
            Some(Service::Mts) => self.mts.as_ref(),
            _ => self.fallback.as_ref(),
        };
        proxy.cloned()
    }
}

fn proxy_service(host: &str) -> Option<Service> {
    if host.contains("yandex.") {
        Some(Service::Yandex)
    } else if is_vk_host(host) {
        Some(Service::Vk)
    } else if host == "mts.ru" || host.ends_with(".mts.ru") {
        Some(Service::Mts)
    } else {
        None
    }
}
