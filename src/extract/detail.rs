use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::trace;
use url::Url;

use super::{element_text, resolve, selector, DetailExtractor, DetailPage};
use crate::error::ExtractionError;
use crate::record::PartialRecord;
use crate::schema::field;

static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("span.title-info-title-text"));
static DATE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"span[data-marker="item-view/item-date"]"#));
static PRICE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"span.styles-module-size_m-Co_QG[itemprop="price"]"#));
static LOCATION: LazyLock<Selector> =
    LazyLock::new(|| selector("span.style-item-address__string-wt61A"));
static DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| selector("div.style-item-description-html-qCwUL"));
static PARAMS: LazyLock<Selector> = LazyLock::new(|| selector("ul.params-paramsList-zLpAu > li"));
static SPECS_LINK: LazyLock<Selector> =
    LazyLock::new(|| selector("div.params-specification-__5qD a[href]"));

static PARAM_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:]+?)\s*:\s+(.+)$").unwrap());

/// Labels of the "Характеристики" list that map onto schema fields.
/// Anything else is passed through under its own label.
const PARAM_LABELS: &[(&str, &str)] = &[
    ("Год выпуска", field::YEAR),
    ("Поколение", field::GENERATION),
    ("Состояние", field::CONDITION),
    ("Модификация", field::TRIM),
    ("Объём двигателя", field::ENGINE_VOLUME),
    ("Тип двигателя", field::ENGINE_TYPE),
    ("Коробка передач", field::TRANSMISSION),
    ("Привод", field::DRIVE_TYPE),
    ("Тип кузова", field::BODY_TYPE),
    ("Цвет", field::COLOR),
    ("Руль", field::STEERING_SIDE),
    ("VIN или номер кузова", field::VIN),
    ("VIN", field::VIN),
];

pub struct AvitoDetail {
    origin: Url,
}

impl AvitoDetail {
    pub fn new(origin: Url) -> Self {
        AvitoDetail { origin }
    }
}

impl DetailExtractor for AvitoDetail {
    fn extract_detail(&self, markup: &str, source_url: &str) -> Result<DetailPage, ExtractionError> {
        let doc = Html::parse_document(markup);
        let first_text = |sel: &Selector| doc.select(sel).next().map(element_text);

        let title = first_text(&TITLE)
            .filter(|t| !t.is_empty())
            .ok_or(ExtractionError::MissingRequiredField(field::TITLE))?;

        let mut record = PartialRecord::new();

        // Key-value list first so the dedicated selectors below take precedence.
        for item in doc.select(&PARAMS) {
            let line = element_text(item);
            match parse_param(&line) {
                Some((label, value)) => record.insert(param_field(label), value),
                None => trace!("Skipping malformed param line: {:?}", line),
            }
        }

        if let Some((brand, model)) = split_brand_model(&title) {
            record.insert(field::BRAND, brand);
            record.insert(field::MODEL, model);
        }
        record.insert(field::TITLE, &title);

        if let Some(date) = first_text(&DATE) {
            record.insert(field::LISTING_DATE, trim_separator(&date));
        }
        if let Some(price) = first_text(&PRICE) {
            record.insert(field::PRICE, price);
        }
        if let Some(location) = first_text(&LOCATION) {
            record.insert(field::LOCATION, location);
        }
        if let Some(description) = first_text(&DESCRIPTION) {
            record.insert(field::DESCRIPTION, description);
        }
        record.insert(field::LINK, source_url);

        let specs_url = doc
            .select(&SPECS_LINK)
            .find_map(|a| a.value().attr("href"))
            .and_then(|href| resolve(&self.origin, href));

        Ok(DetailPage { record, specs_url })
    }
}

/// "Toyota Camry, 2018" → ("Toyota", "Camry"). `None` with fewer than two tokens.
fn split_brand_model(title: &str) -> Option<(&str, &str)> {
    let mut tokens = title.split_whitespace();
    let brand = tokens.next()?;
    let model = tokens.next()?.trim_matches(',');
    Some((brand, model))
}

fn trim_separator(date: &str) -> &str {
    date.trim_matches(|c: char| c == '·' || c.is_whitespace())
}

fn parse_param(line: &str) -> Option<(&str, &str)> {
    let caps = PARAM_LINE_RE.captures(line)?;
    let label = caps.get(1)?.as_str().trim();
    let value = caps.get(2)?.as_str().trim();
    if label.is_empty() || value.is_empty() {
        return None;
    }
    Some((label, value))
}

fn param_field(label: &str) -> &str {
    PARAM_LABELS
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, f)| *f)
        .unwrap_or(label)
}
