use std::collections::HashSet;

/// Paths served directly by default.
pub const DEFAULT_ALLOWED_PATHS: [&str; 4] =
    ["/", "/favicon.ico", "/lib/valor.js", "/lib/valor_bg.wasm"];

/// Static-asset rules for requests that skip the correlation protocol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AllowList {
    extensions: HashSet<String>,
    paths: HashSet<String>,
}

impl AllowList {
    /// An allow-list matching nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            extensions: HashSet::new(),
            paths: HashSet::new(),
        }
    }

    /// Adds an exact path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.paths.insert(path.into());
        self
    }

    /// Adds a file extension, with or without the leading dot.
    #[must_use]
    pub fn with_extension(mut self, extension: impl AsRef<str>) -> Self {
        self.extensions.insert(
            extension
                .as_ref()
                .trim_start_matches('.')
                .to_ascii_lowercase(),
        );
        self
    }

    /// Whether a request for `path` should be served directly.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        if self.paths.contains(path) {
            return true;
        }

        let file_name = path.rsplit('/').next().unwrap_or(path);
        file_name
            .rsplit_once('.')
            .is_some_and(|(stem, extension)| {
                !stem.is_empty() && self.extensions.contains(&extension.to_ascii_lowercase())
            })
    }
}

impl Default for AllowList {
    fn default() -> Self {
        DEFAULT_ALLOWED_PATHS
            .iter()
            .fold(Self::empty(), |list, path| list.with_path(*path))
    }
}
