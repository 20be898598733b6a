//! 🧮 MetricAccumulator: a state machine with exactly one product on its mind at a time.
//!
//! It hears `<product id="P1">`, it starts a fresh notebook. It hears `<metric_x>10`,
//! it writes down 10. It hears `</product>`, it does the division, hands over the
//! result, and tears the page out. Whether or not anything was produced, the page
//! gets torn out. That tear is the recovery point for every malformed product in the file.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::common::ProductMetric;
use crate::extractors::ParseHandler;

/// 🏷️ The element that frames one product.
const PRODUCT_TAG: &str = "product";
/// 🏷️ The attribute on `<product>` that names it.
const PRODUCT_ID_ATTR: &str = "id";

/// 📊 The metric tags whose text is expected to be a number. Anything else is scenery.
pub const RECOGNIZED_METRIC_TAGS: [&str; 3] = ["metric_x", "metric_y", "metric_z"];

/// 🧮 Per-document accumulator. Owned by exactly one extractor, dies with it.
#[derive(Debug)]
pub struct MetricAccumulator {
    source_file: String,
    current_tag: String,
    current_product_id: Option<String>,
    current_metric_values: HashMap<String, f64>,
    // -- 🔢 products that closed without producing a record (no id, or no usable numbers)
    skipped_products: usize,
}

impl MetricAccumulator {
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            current_tag: String::new(),
            current_product_id: None,
            current_metric_values: HashMap::new(),
            skipped_products: 0,
        }
    }

    /// 🔢 How many `<product>` blocks were closed without yielding a record so far.
    pub fn skipped_products(&self) -> usize {
        self.skipped_products
    }

    fn is_recognized_metric(tag: &str) -> bool {
        RECOGNIZED_METRIC_TAGS.contains(&tag)
    }

    fn reset_product(&mut self) {
        self.current_product_id = None;
        self.current_metric_values.clear();
    }
}

impl ParseHandler for MetricAccumulator {
    type Output = ProductMetric;

    fn on_element_start(&mut self, name: &str, attributes: &[(String, String)]) {
        self.current_tag.clear();
        self.current_tag.push_str(name);

        if name == PRODUCT_TAG {
            // -- 🧹 a new product wipes whatever a broken previous one left behind. no merging.
            self.current_product_id = attributes
                .iter()
                .find(|(key, _)| key == PRODUCT_ID_ATTR)
                .map(|(_, value)| value.clone());
            self.current_metric_values.clear();
        }
    }

    fn on_characters(&mut self, text: &str) {
        let content = text.trim();
        if content.is_empty() || !Self::is_recognized_metric(&self.current_tag) {
            return;
        }

        match content.parse::<f64>() {
            Ok(value) => {
                self.current_metric_values
                    .insert(self.current_tag.clone(), value);
            }
            Err(_) => {
                // ⚠️ soft failure: the value stays unset, it does NOT become zero
                warn!(
                    "⚠️ Non-numeric value {:?} for tag <{}> on product {:?} in file '{}'. Skipping.",
                    content,
                    self.current_tag,
                    self.current_product_id.as_deref().unwrap_or("<no id>"),
                    self.source_file
                );
            }
        }
    }

    fn on_element_end(&mut self, name: &str) -> Option<ProductMetric> {
        self.current_tag.clear();
        if name != PRODUCT_TAG {
            return None;
        }

        let product_id = self.current_product_id.take().filter(|id| !id.is_empty());
        let record = product_id.and_then(|id| {
            ProductMetric::from_values(
                id,
                self.source_file.clone(),
                self.current_metric_values.values(),
            )
        });

        if record.is_none() {
            self.skipped_products += 1;
            debug!(
                "🙈 skipped a <product> in '{}': missing id or no usable metrics",
                self.source_file
            );
        }

        self.reset_product();
        record
    }
}
