use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Column labels shared by both export sinks.
pub const HEADERS: [&str; 6] = [
    "Бренд",
    "Артикул",
    "Наименование товара",
    "Цена, руб.",
    "Ссылка",
    "Дата проверки",
];

const OBSERVED_AT_FORMAT: &str = "%d.%m.%Y_%H:%M";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub brand: String,
    pub catalog_id: String,
    pub name: String,
    pub price: String,
    pub detail_url: String,
    pub observed_at: String,
}

/// Formats a check time as `DD.MM.YYYY_HH:MM`.
pub fn format_observed_at(at: NaiveDateTime) -> String {
    at.format(OBSERVED_AT_FORMAT).to_string()
}

pub fn observed_now() -> String {
    format_observed_at(chrono::Local::now().naive_local())
}

/// Column-oriented records for one brand page, in block order.
///
/// Append-only; every column always has the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    brands: Vec<String>,
    catalog_ids: Vec<String>,
    names: Vec<String>,
    prices: Vec<String>,
    detail_urls: Vec<String>,
    observed_at: Vec<String>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ProductRecord) {
        self.brands.push(record.brand);
        self.catalog_ids.push(record.catalog_id);
        self.names.push(record.name);
        self.prices.push(record.price);
        self.detail_urls.push(record.detail_url);
        self.observed_at.push(record.observed_at);
    }

    pub fn len(&self) -> usize {
        self.brands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brands.is_empty()
    }

    /// Brand of the first record; names the sheet the set is exported to.
    pub fn brand(&self) -> Option<&str> {
        self.brands.first().map(String::as_str)
    }

    /// Columns in header order.
    pub fn columns(&self) -> [&[String]; 6] {
        [
            &self.brands,
            &self.catalog_ids,
            &self.names,
            &self.prices,
            &self.detail_urls,
            &self.observed_at,
        ]
    }

    pub fn rows(&self) -> impl Iterator<Item = [&str; 6]> + '_ {
        (0..self.len()).map(move |i| {
            [
                self.brands[i].as_str(),
                self.catalog_ids[i].as_str(),
                self.names[i].as_str(),
                self.prices[i].as_str(),
                self.detail_urls[i].as_str(),
                self.observed_at[i].as_str(),
            ]
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_record(brand: &str, catalog_id: &str) -> ProductRecord {
    ProductRecord {
        brand: brand.to_string(),
        catalog_id: catalog_id.to_string(),
        name: format!("Item {catalog_id}"),
        price: "1\u{a0}234".to_string(),
        detail_url: format!("/catalog/{catalog_id}/detail.aspx"),
        observed_at: "05.03.2024_07:04".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn observed_at_is_zero_padded() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(7, 4, 59)
            .unwrap();
        assert_eq!(format_observed_at(at), "05.03.2024_07:04");
    }

    #[test]
    fn observed_now_matches_pattern() {
        let stamp = observed_now();
        let bytes = stamp.as_bytes();
        assert_eq!(stamp.len(), 16);
        for (i, b) in bytes.iter().enumerate() {
            match i {
                2 | 5 => assert_eq!(*b, b'.'),
                10 => assert_eq!(*b, b'_'),
                13 => assert_eq!(*b, b':'),
                _ => assert!(b.is_ascii_digit(), "{stamp}"),
            }
        }
    }

    #[test]
    fn columns_stay_parallel_and_ordered() {
        let mut set = ResultSet::new();
        assert!(set.is_empty());
        assert_eq!(set.brand(), None);

        set.push(sample_record("VegaGreen", "101"));
        set.push(sample_record("VegaGreen", "102"));
        set.push(sample_record("Other", "103"));

        assert_eq!(set.len(), 3);
        assert_eq!(set.brand(), Some("VegaGreen"));
        for column in set.columns() {
            assert_eq!(column.len(), 3);
        }
        let ids: Vec<&str> = set.rows().map(|row| row[1]).collect();
        assert_eq!(ids, ["101", "102", "103"]);
    }
}
