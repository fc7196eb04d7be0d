//! Site-specific markup extraction behind stable traits.
//!
//! The pipeline only sees [`ListingExtractor`], [`DetailExtractor`] and
//! [`SpecsExtractor`]; selectors live in the submodules and can change with
//! the site without touching the crawl loop.

pub mod detail;
pub mod listing;
pub mod specs;

use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use regex::Regex;
use scraper::{ElementRef, Selector};
use url::Url;

use crate::error::ExtractionError;
use crate::record::PartialRecord;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Detail page fields plus the optional specifications link.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailPage {
    pub record: PartialRecord,
    pub specs_url: Option<String>,
}

pub trait ListingExtractor: Send + Sync {
    /// Absolute detail URLs of every card on a listing page. Empty when the
    /// page does not look like a listing.
    fn extract_card_urls(&self, markup: &str) -> Vec<String>;
}

pub trait DetailExtractor: Send + Sync {
    fn extract_detail(&self, markup: &str, source_url: &str) -> Result<DetailPage, ExtractionError>;
}

pub trait SpecsExtractor: Send + Sync {
    /// Only fields from the closed technical set are returned.
    fn extract_specs(&self, markup: &str) -> PartialRecord;
}

#[derive(Clone)]
pub struct Extractors {
    pub listing: Arc<dyn ListingExtractor>,
    pub detail: Arc<dyn DetailExtractor>,
    pub specs: Arc<dyn SpecsExtractor>,
}

impl Extractors {
    /// Avito selectors, resolving relative links against `site`.
    pub fn avito(site: &str) -> Result<Self> {
        let origin = Url::parse(site).with_context(|| format!("Invalid site URL: {}", site))?;
        Ok(Extractors {
            listing: Arc::new(listing::AvitoListing::new(origin.clone())),
            detail: Arc::new(detail::AvitoDetail::new(origin)),
            specs: Arc::new(specs::AvitoSpecs),
        })
    }
}

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("bad selector {:?}: {:?}", css, e))
}

/// Element text with whitespace runs (nbsp included) collapsed.
pub(crate) fn element_text(el: ElementRef) -> String {
    let raw: String = el.text().collect();
    collapse_ws(&raw)
}

pub(crate) fn collapse_ws(s: &str) -> String {
    WS_RE.replace_all(s, " ").trim().to_string()
}

/// Resolve `href` against the site origin. Absolute hrefs pass through.
pub(crate) fn resolve(origin: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    origin.join(href).ok().map(String::from)
}

#[cfg(test)]
pub(crate) fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_and_keeps_absolute() {
        let origin = Url::parse("https://www.avito.ru").unwrap();
        assert_eq!(
            resolve(&origin, "/perm/avtomobili/kia_rio_1").as_deref(),
            Some("https://www.avito.ru/perm/avtomobili/kia_rio_1")
        );
        assert_eq!(
            resolve(&origin, "https://m.avito.ru/x").as_deref(),
            Some("https://m.avito.ru/x")
        );
        assert_eq!(resolve(&origin, "  "), None);
    }

    #[test]
    fn collapses_nbsp() {
        assert_eq!(collapse_ws("  1\u{a0}450\u{a0}000 \n ₽ "), "1 450 000 ₽");
    }

    #[test]
    fn avito_rejects_bad_origin() {
        assert!(Extractors::avito("not a url").is_err());
    }
}
