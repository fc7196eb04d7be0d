use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::{element_text, selector, SpecsExtractor};
use crate::record::PartialRecord;
use crate::schema::field;

static SPEC_ROW: LazyLock<Selector> = LazyLock::new(|| selector("div.desktop-1jb7eb2"));
static SPAN: LazyLock<Selector> = LazyLock::new(|| selector("span"));

/// The closed set of technical fields taken from the specifications page.
pub const TECH_FIELDS: &[(&str, &str)] = &[
    ("Расход топлива смешанный", field::FUEL_CONSUMPTION),
    ("Разгон до 100 км/ч", field::ACCELERATION),
    ("Колея передняя", field::FRONT_TRACK),
    ("Колея задняя", field::REAR_TRACK),
    ("Длина", field::LENGTH),
    ("Высота", field::HEIGHT),
    ("Дорожный просвет", field::GROUND_CLEARANCE),
    ("Ёмкость топливного бака", field::FUEL_TANK_CAPACITY),
];

pub struct AvitoSpecs;

impl SpecsExtractor for AvitoSpecs {
    fn extract_specs(&self, markup: &str) -> PartialRecord {
        let doc = Html::parse_document(markup);
        let mut record = PartialRecord::new();

        for row in doc.select(&SPEC_ROW) {
            let mut spans = row.select(&SPAN);
            let (Some(label), Some(value)) = (spans.next(), spans.next()) else {
                continue;
            };
            let label = element_text(label);
            if let Some((_, name)) = TECH_FIELDS.iter().find(|(l, _)| *l == label) {
                record.insert(*name, element_text(value));
            }
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::fixture;

    #[test]
    fn keeps_only_technical_fields() {
        let record = AvitoSpecs.extract_specs(&fixture("specs"));
        assert_eq!(record.len(), 8);
        assert_eq!(record.get(field::FUEL_CONSUMPTION), Some("7.8 л"));
        assert_eq!(record.get(field::ACCELERATION), Some("9.9 с"));
        assert_eq!(record.get(field::GROUND_CLEARANCE), Some("155 мм"));
        let allowed: Vec<&str> = TECH_FIELDS.iter().map(|(_, f)| *f).collect();
        assert!(record.keys().all(|k| allowed.contains(&k)));
        assert!(record.get("Максимальная скорость").is_none());
    }

    #[test]
    fn rows_with_one_span_are_ignored() {
        let html = r#"<div class="desktop-1jb7eb2"><span>Длина</span></div>"#;
        assert!(AvitoSpecs.extract_specs(html).is_empty());
    }

    #[test]
    fn unrelated_page_is_empty() {
        assert!(AvitoSpecs.extract_specs(&fixture("listing")).is_empty());
    }
}
