use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use super::{resolve, selector, ListingExtractor};

static CARD: LazyLock<Selector> = LazyLock::new(|| selector("div.iva-item-body-KLUuy"));
static CARD_LINK: LazyLock<Selector> =
    LazyLock::new(|| selector("div.iva-item-title-py3i_ a[href]"));

pub struct AvitoListing {
    origin: Url,
}

impl AvitoListing {
    pub fn new(origin: Url) -> Self {
        AvitoListing { origin }
    }
}

impl ListingExtractor for AvitoListing {
    fn extract_card_urls(&self, markup: &str) -> Vec<String> {
        let doc = Html::parse_document(markup);
        let mut seen = HashSet::new();

        doc.select(&CARD)
            .filter_map(|card| card.select(&CARD_LINK).next())
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve(&self.origin, href))
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::fixture;

    fn listing() -> AvitoListing {
        AvitoListing::new(Url::parse("https://www.avito.ru").unwrap())
    }

    #[test]
    fn finds_every_card_as_absolute_url() {
        let urls = listing().extract_card_urls(&fixture("listing"));
        assert_eq!(
            urls,
            vec![
                "https://www.avito.ru/perm/avtomobili/toyota_camry_2018_3456789012",
                "https://www.avito.ru/perm/avtomobili/lada_granta_2020_2345678901",
                "https://www.avito.ru/perm/avtomobili/kia_rio_2016_1234567890",
            ]
        );
    }

    #[test]
    fn blocked_page_yields_nothing() {
        assert!(listing().extract_card_urls(&fixture("blocked")).is_empty());
        assert!(listing().extract_card_urls("").is_empty());
    }

    #[test]
    fn card_without_title_link_is_skipped() {
        let html = r#"
            <div class="iva-item-body-KLUuy"><div class="iva-item-title-py3i_">no link</div></div>
            <div class="iva-item-body-KLUuy"><div class="iva-item-title-py3i_"><a href="/a/1">A</a></div></div>
        "#;
        assert_eq!(listing().extract_card_urls(html), vec!["https://www.avito.ru/a/1"]);
    }
}
