use thiserror::Error;

/// Errors surfaced to the caller of a resolution.
///
/// Per-service lookup failures never show up here: collaborators report
/// them as empty results and the service ends up `NotFound`.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Network or HTTP failure while fetching the seed page
    #[error("не удалось загрузить {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The destination answered with an interstitial challenge page
    #[error("страница {url} вернула капчу; откройте ссылку в браузере, решите капчу и повторите")]
    Captcha { url: String },

    /// Malformed payload from a catalog or page
    #[error("ошибка разбора ответа: {0}")]
    Parse(String),

    /// VK/YouTube link that does not point to music
    #[error("ссылка не относится к музыке: {0}")]
    NotMusic(String),
}

pub type Result<T> = std::result::Result<T, ResolveError>;
