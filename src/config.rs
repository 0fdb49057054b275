use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::models::Service;
use crate::sources::CredentialProvider;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_USER_AGENT: &str = "TelegramBot (like TwitterBot)";
const DEFAULT_VK_API_HOST: &str = "api.vk.com";
const DEFAULT_STOREFRONT: &str = "ru";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub yandex: YandexConfig,
    #[serde(default)]
    pub vk: VkConfig,
    #[serde(default)]
    pub mts: MtsConfig,
    #[serde(default)]
    pub ytmusic: YtMusicConfig,
    #[serde(default)]
    pub apple: AppleConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Omit when tracks are region-locked; an empty market searches everywhere.
    pub market: Option<String>,
}

impl SpotifyConfig {
    pub fn is_configured(&self) -> bool {
        self.client_id.as_ref().is_some_and(|s| !s.is_empty())
            && self.client_secret.as_ref().is_some_and(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YandexConfig {
    /// OAuth token for api.music.yandex.net
    pub token: Option<String>,
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VkConfig {
    pub access_token: Option<String>,
    /// JSON file with an `access_token` field, used when `access_token` is unset
    pub token_file: Option<PathBuf>,
    pub api_host: Option<String>,
    pub proxy: Option<String>,
}

impl VkConfig {
    pub fn api_host(&self) -> &str {
        non_empty(self.api_host.as_deref()).unwrap_or(DEFAULT_VK_API_HOST)
    }

    /// Token from the config, or from `token_file`.
    pub fn token(&self) -> Option<String> {
        if let Some(token) = non_empty(self.access_token.as_deref()) {
            return Some(token.to_string());
        }
        let path = self.token_file.as_ref()?;
        match read_token_file(path) {
            Ok(token) => token,
            Err(e) => {
                warn!("VK: {:#}", e);
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct TokenFile {
    access_token: Option<String>,
}

fn read_token_file(path: &Path) -> Result<Option<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("не удалось прочитать {}", path.display()))?;
    let parsed: TokenFile = serde_json::from_str(&content)
        .with_context(|| format!("некорректный JSON в {}", path.display()))?;
    Ok(parsed.access_token.filter(|t| !t.trim().is_empty()))
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MtsConfig {
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YtMusicConfig {
    pub cookie: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppleConfig {
    pub storefront: Option<String>,
}

impl AppleConfig {
    pub fn storefront(&self) -> &str {
        non_empty(self.storefront.as_deref()).unwrap_or(DEFAULT_STOREFRONT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HttpConfig {
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    /// Used for every service without its own proxy
    pub proxy: Option<String>,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.filter(|s| *s > 0).unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn user_agent(&self) -> &str {
        non_empty(self.user_agent.as_deref()).unwrap_or(DEFAULT_USER_AGENT)
    }
}

impl Config {
    /// Proxy for requests to `service`: its own, else the shared one.
    pub fn proxy_for(&self, service: Service) -> Option<&str> {
        let own = match service {
            Service::Yandex => self.yandex.proxy.as_deref(),
            Service::Vk => self.vk.proxy.as_deref(),
            Service::Mts => self.mts.proxy.as_deref(),
            _ => None,
        };
        non_empty(own).or_else(|| non_empty(self.http.proxy.as_deref()))
    }

    /// Environment variables win over the file.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let set = |slot: &mut Option<String>, key: &str| {
            if let Some(value) = get(key) {
                debug!("{} задан через окружение", key);
                *slot = Some(value);
            }
        };
        set(&mut self.spotify.client_id, "SPOTIFY_CLIENT_ID");
        set(&mut self.spotify.client_secret, "SPOTIFY_CLIENT_SECRET");
        set(&mut self.spotify.market, "SPOTIFY_MARKET");
        set(&mut self.yandex.token, "YANDEX_TOKEN");
        set(&mut self.yandex.proxy, "YANDEX_PROXY_URL");
        set(&mut self.vk.access_token, "VK_ACCESS_TOKEN");
        set(&mut self.vk.api_host, "VK_API_HOST");
        set(&mut self.vk.proxy, "VK_PROXY_URL");
        set(&mut self.mts.proxy, "MTS_PROXY_URL");
        set(&mut self.http.proxy, "MUSIC_PROXY_URL");
    }
}

impl CredentialProvider for Config {
    fn credential(&self, service: Service) -> Option<String> {
        match service {
            Service::Yandex => non_empty(self.yandex.token.as_deref()).map(str::to_string),
            Service::Vk => self.vk.token(),
            Service::Ytmusic => non_empty(self.ytmusic.authorization.as_deref()).map(str::to_string),
            _ => None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("MUSICLINK_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".config")
        .join("musiclink")
        .join("config.toml")
}

/// Config file plus environment overrides.
pub fn load_config() -> Config {
    let mut config = load_from(&config_path());
    config.apply_env();
    config
}

/// A missing or broken file yields the defaults.
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            warn!("{} не разобран, используются значения по умолчанию: {}", path.display(), e);
            Config::default()
        }),
        Err(_) => Config::default(),
    }
}

pub fn save_config(config: &Config) -> Result<()> {
    save_to(config, &config_path())
}

pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
