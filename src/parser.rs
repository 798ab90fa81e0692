use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, error, info};

use crate::error::MissingField;
use crate::models::{ProductRecord, ResultSet, observed_now};

/// Listing card; an element qualifies only when it carries all three classes.
static PRODUCT_CARD: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".product-card.j-card-item.j-good-for-listing-event").unwrap()
});
static BRAND_NAME: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".brand-name").unwrap());
static GOODS_NAME: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".goods-name").unwrap());
static LOWER_PRICE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".price__lower-price").unwrap());
static CARD_WRAPPER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".product-card__wrapper").unwrap());
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

const CATALOG_ID_ATTR: &str = "data-popup-nm-id";
const PRICE_TAIL: &str = "\u{a0}₽";

/// A parsed listing page. Blocks borrow from it, so it must outlive them.
pub struct ListingPage {
    doc: Html,
}

impl ListingPage {
    pub fn parse(html: &str) -> Self {
        Self {
            doc: Html::parse_document(html),
        }
    }

    /// Product cards in document order.
    pub fn blocks(&self) -> impl Iterator<Item = ProductBlock<'_>> {
        self.doc.select(&PRODUCT_CARD).map(ProductBlock)
    }
}

/// One product card sub-tree of a [`ListingPage`].
#[derive(Clone, Copy)]
pub struct ProductBlock<'a>(ElementRef<'a>);

impl ProductBlock<'_> {
    /// Reads all required fields, failing on the first one that is absent.
    pub fn extract(&self) -> Result<ProductRecord, MissingField> {
        let brand = self.text_of(&BRAND_NAME).ok_or(MissingField::Brand)?;
        let catalog_id = self.catalog_id().ok_or(MissingField::CatalogId)?;
        let name = self.text_of(&GOODS_NAME).ok_or(MissingField::Name)?;
        let price = self
            .text_of(&LOWER_PRICE)
            .map(|raw| normalize_price(&raw))
            .filter(|price| !price.is_empty())
            .ok_or(MissingField::Price)?;
        let detail_url = self.detail_url().ok_or(MissingField::DetailUrl)?;

        Ok(ProductRecord {
            brand,
            catalog_id,
            name,
            price,
            detail_url,
            observed_at: observed_now(),
        })
    }

    fn text_of(&self, selector: &Selector) -> Option<String> {
        self.0
            .select(selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|text| !text.is_empty())
    }

    fn catalog_id(&self) -> Option<String> {
        self.0
            .value()
            .attr(CATALOG_ID_ATTR)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    fn detail_url(&self) -> Option<String> {
        let wrapper = self.0.select(&CARD_WRAPPER).next()?;
        wrapper
            .select(&ANCHOR)
            .next()?
            .value()
            .attr("href")
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .map(str::to_string)
    }
}

/// Trims the price text and drops the trailing `"\u{a0}₽"` marker.
///
/// Interior non-breaking spaces (thousands separators) are kept.
pub fn normalize_price(raw: &str) -> String {
    let mut price = raw.trim();
    while let Some(stripped) = price.strip_suffix(PRICE_TAIL) {
        price = stripped.trim_end();
    }
    price.to_string()
}

/// Outcome of extracting every block on one page.
#[derive(Debug, Default)]
pub struct PageExtraction {
    pub results: ResultSet,
    pub missing: Vec<MissingField>,
    pub blocks: usize,
}

/// Extracts every block in order; a failing block is reported and skipped,
/// never aborting the rest of the page.
pub fn extract_blocks<'a>(blocks: impl Iterator<Item = ProductBlock<'a>>) -> PageExtraction {
    let mut out = PageExtraction::default();

    for (index, block) in blocks.enumerate() {
        out.blocks += 1;
        match block.extract() {
            Ok(record) => {
                info!(
                    "{}, {}, {}, {}, {}, {}",
                    record.brand,
                    record.catalog_id,
                    record.name,
                    record.price,
                    record.detail_url,
                    record.observed_at
                );
                out.results.push(record);
            }
            Err(field) => {
                error!(block = index, %field, "No {field}");
                out.missing.push(field);
            }
        }
    }

    debug!(blocks = out.blocks, records = out.results.len(), "page extracted");
    out
}


#[cfg(test)]
mod tests {
    use super::fixtures::{card, page};
    use super::*;

    fn extract_page(html: &str) -> PageExtraction {
        extract_blocks(ListingPage::parse(html).blocks())
    }

    fn single_block_result(html: &str) -> Result<ProductRecord, MissingField> {
        let page = ListingPage::parse(html);
        let block = page.blocks().next().expect("one block");
        block.extract()
    }

    #[test]
    fn extracts_all_fields() {
        let html = page(&[card("15731442", Some("VegaGreen"), " 1\u{a0}234\u{a0}₽ ")]);
        let record = single_block_result(&html).unwrap();

        assert_eq!(record.brand, "VegaGreen");
        assert_eq!(record.catalog_id, "15731442");
        assert_eq!(record.name, "/ Product 15731442");
        assert_eq!(record.price, "1\u{a0}234");
        assert_eq!(record.detail_url, "/catalog/15731442/detail.aspx");
        assert_eq!(record.observed_at.len(), 16);
    }

    #[test]
    fn empty_page_has_no_blocks() {
        let result = extract_page("<html><body><p>nothing here</p></body></html>");
        assert_eq!(result.blocks, 0);
        assert!(result.results.is_empty());
        assert!(result.missing.is_empty());

        assert_eq!(extract_page("").blocks, 0);
    }

    #[test]
    fn partial_class_set_is_not_a_block() {
        let html = r#"<div class="product-card j-card-item" data-popup-nm-id="1">
                        <span class="brand-name">X</span></div>
                      <div class="j-card-item j-good-for-listing-event product-card extra"
                           data-popup-nm-id="2"></div>"#;
        let page = ListingPage::parse(html);
        let ids: Vec<_> = page
            .blocks()
            .map(|b| b.0.value().attr(CATALOG_ID_ATTR).unwrap_or_default().to_string())
            .collect();
        assert_eq!(ids, ["2"]);
    }

    #[test]
    fn missing_brand_is_named() {
        let html = page(&[card("1", None, "100\u{a0}₽")]);
        assert_eq!(single_block_result(&html), Err(MissingField::Brand));
    }

    #[test]
    fn blank_or_absent_catalog_id_is_missing() {
        let blank = page(&[card("", Some("B"), "100")]);
        assert_eq!(single_block_result(&blank), Err(MissingField::CatalogId));

        let absent = format!(
            r#"<div class="{}"><span class="brand-name">B</span></div>"#,
            super::fixtures::CARD_CLASS
        );
        assert_eq!(single_block_result(&absent), Err(MissingField::CatalogId));
    }

    #[test]
    fn each_missing_field_is_reported_by_name() {
        let cls = super::fixtures::CARD_CLASS;
        let no_name = format!(
            r#"<div class="{cls}" data-popup-nm-id="7"><span class="brand-name">B</span></div>"#
        );
        assert_eq!(single_block_result(&no_name), Err(MissingField::Name));

        let no_price = format!(
            r#"<div class="{cls}" data-popup-nm-id="7"><span class="brand-name">B</span>
               <span class="goods-name">N</span></div>"#
        );
        assert_eq!(single_block_result(&no_price), Err(MissingField::Price));

        let no_wrapper = format!(
            r#"<div class="{cls}" data-popup-nm-id="7"><span class="brand-name">B</span>
               <span class="goods-name">N</span><ins class="price__lower-price">5</ins>
               <a href="/elsewhere">x</a></div>"#
        );
        assert_eq!(single_block_result(&no_wrapper), Err(MissingField::DetailUrl));

        let no_anchor = format!(
            r#"<div class="{cls}" data-popup-nm-id="7"><span class="brand-name">B</span>
               <span class="goods-name">N</span><ins class="price__lower-price">5</ins>
               <div class="product-card__wrapper"><span>no link</span></div></div>"#
        );
        assert_eq!(single_block_result(&no_anchor), Err(MissingField::DetailUrl));
    }

    #[test]
    fn one_bad_block_does_not_stop_the_page() {
        let html = page(&[
            card("1", Some("VegaGreen"), "100\u{a0}₽"),
            card("2", None, "200\u{a0}₽"),
            card("3", Some("VegaGreen"), "300\u{a0}₽"),
        ]);
        let result = extract_page(&html);

        assert_eq!(result.blocks, 3);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.missing, [MissingField::Brand]);
        for column in result.results.columns() {
            assert_eq!(column.len(), 2);
        }
        let ids: Vec<&str> = result.results.rows().map(|r| r[1]).collect();
        assert_eq!(ids, ["1", "3"]);
    }

    #[test]
    fn price_keeps_interior_spaces() {
        assert_eq!(normalize_price("1\u{a0}234\u{a0}₽"), "1\u{a0}234");
        assert_eq!(normalize_price("  99\u{a0}₽\n"), "99");
        assert_eq!(normalize_price("99 ₽"), "99 ₽");
        assert_eq!(normalize_price("₽99"), "₽99");
    }

    #[test]
    fn price_normalization_is_idempotent() {
        for raw in [
            "1\u{a0}234\u{a0}₽",
            " 500 ",
            "7\u{a0}₽\u{a0}₽",
            "12 \u{a0}₽",
            "",
            "\u{a0}₽",
        ] {
            let once = normalize_price(raw);
            assert_eq!(normalize_price(&once), once, "{raw:?}");
        }
    }
}
