//! Cache key normalization relative to the worker's origin and scope.

use url::Url;

/// Error type for URL normalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<UrlError> for shellcache_core::Error {
    fn from(err: UrlError) -> Self {
        shellcache_core::Error::InvalidUrl(err.to_string())
    }
}

/// The execution origin plus the registration scope.
///
/// Cache keys are origin-relative (`path` + `query`); asset paths declared
/// relative to the scope resolve against the scope URL so a deployment under
/// a sub-path keeps working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    origin: Url,
    scope: Url,
}

impl Scope {
    /// Build a scope from an origin such as `https://app.example` and a scope
    /// path such as `/` or `/tripgrid/`.
    pub fn new(origin: &str, scope: &str) -> Result<Self, UrlError> {
        let trimmed = origin.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Empty);
        }

        let origin = Url::parse(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
        match origin.scheme() {
            "http" | "https" => {}
            scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
        }

        let origin = origin
            .join("/")
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
        let scope = origin
            .join(scope.trim())
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

        Ok(Self { origin, scope })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Canonical cache key for a URL or path.
    ///
    /// Input starting with `/` is taken as an origin-relative path and query,
    /// so an existing key such as `//assets/app.js` maps back to itself.
    /// Anything else resolves against the origin root. The fragment and the
    /// origin are dropped; the query string is kept as-is.
    pub fn cache_key(&self, input: &str) -> Result<String, UrlError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Empty);
        }

        let url = if trimmed.starts_with('/') {
            self.origin_relative(trimmed)
        } else {
            self.origin
                .join(trimmed)
                .map_err(|e| UrlError::InvalidUrl(e.to_string()))?
        };
        Ok(Self::key_for(&url))
    }

    fn origin_relative(&self, input: &str) -> Url {
        let without_fragment = input.split_once('#').map_or(input, |(before, _)| before);
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (without_fragment, None),
        };

        let mut url = self.origin.clone();
        url.set_path(path);
        url.set_query(query);
        url
    }

    /// Cache key for an already parsed URL.
    pub fn key_for(url: &Url) -> String {
        match url.query() {
            Some(query) if !query.is_empty() => format!("{}?{}", url.path(), query),
            _ => url.path().to_string(),
        }
    }

    /// Pathname of a scope-relative asset path.
    pub fn join_base(&self, rel: &str) -> Result<String, UrlError> {
        let url = self
            .scope
            .join(rel.trim())
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
        Ok(url.path().to_string())
    }

    /// Absolute URL of a scope-relative asset path.
    pub fn scoped_url(&self, rel: &str) -> Result<Url, UrlError> {
        self.scope
            .join(rel.trim())
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))
    }

    /// Whether `url` shares the execution origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Absolute URL on the execution origin for a cache key.
    pub fn resolve(&self, key: &str) -> Result<Url, UrlError> {
        if key.starts_with('/') {
            return Ok(self.origin_relative(key));
        }
        self.origin.join(key).map_err(|e| UrlError::InvalidUrl(e.to_string()))
    }
}
