//! Icon and title resolution
//!
//! Fetches a page, collects icon candidates (the conventional /favicon.ico
//! plus link/meta tag sources), downloads them to scoped temp files and
//! picks the largest by downloaded byte size. The candidate-gathering rules
//! follow Scott Werner's python favicon package.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex_lite::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

/// `<link rel>` values treated as icon sources
const LINK_RELS: [&str; 4] = [
    "icon",
    "shortcut icon",
    "apple-touch-icon",
    "apple-touch-icon-precomposed",
];

/// `<meta name|property|itemprop>` values treated as icon sources
const META_NAMES: [&str; 3] = ["msapplication-tileimage", "og:image", "image"];

#[derive(Debug, Error)]
pub enum IconError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("received status {0} from {1}")]
    BadStatus(u16, String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0} served {1}, not an image")]
    NotAnImage(String, String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no icon candidate could be downloaded")]
    NoUsableIcon,
}

/// A downloaded icon. Immutable once resolved; dimensions are best-effort
/// metadata and never drive selection.
#[derive(Debug, Clone)]
pub struct Icon {
    pub remote_url: String,
    pub file_path: PathBuf,
    pub mime_type: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
}

/// Outcome of resolving a page: its best icon and trimmed title
#[derive(Debug, Clone)]
pub struct ResolvedPage {
    pub icon: Icon,
    pub title: String,
}

/// An icon source extracted from the page markup, before URL resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCandidate {
    pub href: String,
    pub width: u32,
    pub height: u32,
}

/// Resolves icons and titles over HTTP with bounded per-request timeouts
#[derive(Clone)]
pub struct IconResolver {
    http: reqwest::Client,
}

impl IconResolver {
    pub fn new(timeout: Duration) -> Result<Self, IconError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Fetch `base_url` and resolve its best icon and page title.
    ///
    /// Candidates are tried in discovery order, /favicon.ico first; the
    /// largest successful download wins, ties keep the earliest. Fails only
    /// when not a single candidate downloads.
    pub async fn resolve(&self, base_url: &str) -> Result<ResolvedPage, IconError> {
        let response = self.http.get(base_url).send().await?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(IconError::BadStatus(status, base_url.to_string()));
        }

        // relative candidates resolve against the post-redirect URL
        let final_url = response.url().clone();
        let body = response.text().await?;
        let (candidates, title) = extract_candidates(&body);
        tracing::debug!(
            "{} icon tag candidates for {final_url}",
            candidates.len()
        );

        let mut downloaded: Vec<Icon> = Vec::new();

        let favicon = final_url.join("/favicon.ico")?;
        match self.download(favicon, 0, 0).await {
            Ok(icon) => downloaded.push(icon),
            Err(e) => tracing::debug!("favicon.ico fallback failed: {e}"),
        }

        for candidate in candidates {
            let target = match final_url.join(&candidate.href) {
                Ok(url) => url,
                Err(e) => {
                    tracing::debug!("unusable candidate {}: {e}", candidate.href);
                    continue;
                }
            };
            match self.download(target, candidate.width, candidate.height).await {
                Ok(icon) => downloaded.push(icon),
                Err(e) => tracing::debug!("candidate download failed: {e}"),
            }
        }

        tracing::debug!("{} icons downloaded for {final_url}", downloaded.len());
        let icon = select_best(downloaded).ok_or(IconError::NoUsableIcon)?;
        Ok(ResolvedPage { icon, title })
    }

    /// Download one candidate, rejecting non-image responses, and persist
    /// the bytes to a scoped temp file.
    async fn download(&self, url: Url, width: u32, height: u32) -> Result<Icon, IconError> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(IconError::BadStatus(status, url.to_string()));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let parsed: mime::Mime = mime_type
            .parse()
            .map_err(|_| IconError::NotAnImage(url.to_string(), mime_type.clone()))?;
        if parsed.type_() != mime::IMAGE {
            return Err(IconError::NotAnImage(url.to_string(), mime_type));
        }

        let bytes = response.bytes().await?;
        let size = bytes.len() as u64;

        let suffix = mime_guess::get_mime_extensions(&parsed)
            .and_then(|exts| exts.first())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let file = tempfile::Builder::new()
            .prefix("porthole")
            .suffix(&suffix)
            .tempfile()?;
        std::fs::write(file.path(), &bytes)?;
        let (_, file_path) = file.keep().map_err(|e| IconError::Io(e.error))?;

        let (width, height) = if width == 0 && height == 0 {
            filename_dimensions(url.path())
        } else {
            (width, height)
        };

        Ok(Icon {
            remote_url: url.to_string(),
            file_path,
            mime_type,
            size,
            width,
            height,
        })
    }
}

/// Pull icon tag candidates and the page title out of an HTML body.
///
/// Synchronous and allocation-only so it can run before any await point
/// (the parsed DOM is not `Send`).
pub fn extract_candidates(html: &str) -> (Vec<TagCandidate>, String) {
    let doc = Html::parse_document(html);
    let mut candidates = Vec::new();

    let link_selector = Selector::parse("link").expect("static selector");
    for element in doc.select(&link_selector) {
        let Some(rel) = element.value().attr("rel") else {
            continue;
        };
        if LINK_RELS.contains(&rel.to_ascii_lowercase().as_str()) {
            push_candidate(element, &mut candidates);
        }
    }

    let meta_selector = Selector::parse("meta").expect("static selector");
    for element in doc.select(&meta_selector) {
        let kind = element
            .value()
            .attr("name")
            .or_else(|| element.value().attr("property"))
            .or_else(|| element.value().attr("itemprop"));
        let Some(kind) = kind else { continue };
        if META_NAMES.contains(&kind.to_ascii_lowercase().as_str()) {
            push_candidate(element, &mut candidates);
        }
    }

    (candidates, extract_title(&doc))
}

fn push_candidate(element: ElementRef<'_>, candidates: &mut Vec<TagCandidate>) {
    let raw = element
        .value()
        .attr("href")
        .or_else(|| element.value().attr("content"))
        .unwrap_or_default()
        .trim();
    // inline data URIs carry no fetchable remote location
    if raw.is_empty() || raw.starts_with("data:") {
        return;
    }

    let (width, height) = dimensions(element.value().attr("sizes"), raw);
    candidates.push(TagCandidate {
        href: raw.to_string(),
        width,
        height,
    });
}

fn extract_title(doc: &Html) -> String {
    let selector = Selector::parse("title").expect("static selector");
    doc.select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Best-effort dimensions from the `sizes` attribute, falling back to a
/// WxH pattern in the source path. Malformed values become 0x0.
fn dimensions(sizes: Option<&str>, href: &str) -> (u32, u32) {
    if let Some(sizes) = sizes {
        if !sizes.eq_ignore_ascii_case("any") {
            return sizes
                .split_whitespace()
                .filter_map(parse_size_token)
                .max()
                .unwrap_or((0, 0));
        }
    }
    filename_dimensions(href)
}

/// Parse one "WxH" token, tolerating trailing junk like "192x192+"
fn parse_size_token(token: &str) -> Option<(u32, u32)> {
    let mut parts = token.splitn(2, ['x', 'X', '×']);
    let width = leading_number(parts.next()?)?;
    let height = leading_number(parts.next()?)?;
    Some((width, height))
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn filename_dimensions(href: &str) -> (u32, u32) {
    static FILENAME_DIMS: OnceLock<Regex> = OnceLock::new();
    let re = FILENAME_DIMS
        .get_or_init(|| Regex::new(r"(?i)([0-9]{2,4})[x×]([0-9]{2,4})").expect("valid regex"));

    match re.captures(href) {
        Some(caps) => {
            let width = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            let height = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            (width, height)
        }
        None => (0, 0),
    }
}

/// Largest downloaded byte size wins; ties keep the earliest candidate.
fn select_best(icons: Vec<Icon>) -> Option<Icon> {
    icons
        .into_iter()
        .reduce(|best, candidate| if candidate.size > best.size { candidate } else { best })
}
