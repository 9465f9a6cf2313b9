//! URLs served from local directories instead of the network.

use crate::data_url::percent_decode;
use df_core::FetchError;
use df_core::FetchResult;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use url::Url;

pub trait VirtualPathResolver: Send + Sync {
    /// Local path for `url`, or `None` when the URL is not virtual.
    fn resolve(&self, url: &Url) -> Option<PathBuf>;
}

/// Resolves nothing; every URL goes to the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVirtualPaths;

impl VirtualPathResolver for NoVirtualPaths {
    fn resolve(&self, _url: &Url) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Clone)]
struct Mount {
    prefix: Url,
    root: PathBuf,
}

/// URL prefix to directory table. The longest matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct VirtualServerMap {
    mounts: Vec<Mount>,
}

impl VirtualServerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves everything under `prefix` from `root`.
    pub fn mount(&mut self, prefix: &str, root: impl Into<PathBuf>) -> FetchResult<()> {
        let mut prefix = Url::parse(prefix).map_err(|error| {
            FetchError::invalid_input(
                "fetch.virtual.prefix_invalid",
                format!("failed to parse virtual path prefix `{prefix}`: {error}"),
            )
        })?;
        if !prefix.path().ends_with('/') {
            let path = format!("{}/", prefix.path());
            prefix.set_path(&path);
        }
        prefix.set_query(None);
        prefix.set_fragment(None);

        self.mounts.push(Mount {
            prefix,
            root: root.into(),
        });
        self.mounts
            .sort_by(|left, right| right.prefix.as_str().len().cmp(&left.prefix.as_str().len()));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

impl VirtualPathResolver for VirtualServerMap {
    fn resolve(&self, url: &Url) -> Option<PathBuf> {
        let mut target = url.clone();
        target.set_query(None);
        target.set_fragment(None);
        let target = target.as_str();

        let mount = self
            .mounts
            .iter()
            .find(|mount| target.starts_with(mount.prefix.as_str()))?;
        let relative = &target[mount.prefix.as_str().len()..];

        let mut path = mount.root.clone();
        for segment in relative.split('/').filter(|segment| !segment.is_empty()) {
            let decoded = String::from_utf8(percent_decode(segment.as_bytes())).ok()?;
            if decoded == ".." || decoded == "." || decoded.contains(['/', '\\']) {
                log::debug!("refusing virtual path segment `{decoded}` in {url}");
                return None;
            }
            path.push(decoded);
        }
        Some(path)
    }
}

/// A file read from a virtual path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    pub path: PathBuf,
    pub body: Vec<u8>,
    pub modified: Option<SystemTime>,
}

impl VirtualFile {
    /// Reads `path`, or `index.html` inside it when it is a directory.
    /// Returns `None` when there is nothing to serve.
    pub fn load(path: &Path) -> Option<Self> {
        let path = if path.is_dir() {
            path.join("index.html")
        } else {
            path.to_path_buf()
        };

        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(error) => {
                log::debug!("virtual path {} unavailable: {error}", path.display());
                return None;
            }
        };
        let modified = fs::metadata(&path)
            .and_then(|metadata| metadata.modified())
            .ok();
        Some(Self {
            path,
            body,
            modified,
        })
    }

    pub fn content_type(&self) -> &'static str {
        guess_content_type(&self.path)
    }
}

pub fn guess_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}
