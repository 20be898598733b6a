//! 📦 Common data structures, the building blocks of metrix
//!
//! 🎬 COLD OPEN: INT. WATCH FOLDER, 3:47 AM
//!
//! A file lands. Nobody announced it. It contains products. The products contain
//! numbers. Some of the numbers are numbers. Some of them are the word "abc".
//! Somebody, somewhere, is going to want the average.
//!
//! This module holds the one struct that survives the whole trip from angle
//! brackets to sorted set: [`ProductMetric`]. It is born in the accumulator, handed
//! to the job, written to the store, and then dropped without a funeral.
//!
//! 🦆

use std::path::Path;

/// 🎯 One product, one mean, one file it came from.
///
/// Produced once per `<product>` element that had a non-empty `id` and at least
/// one metric tag that parsed as a number. Ownership moves to whoever called
/// `next_metric()`. Nobody keeps a copy. Memory is a privilege, not a right.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductMetric {
    /// 🏷️ The product's `id` attribute. Never empty, the accumulator checks.
    pub product_id: String,
    /// 📊 sum(values) / count(values). An arithmetic mean, no weights, no drama.
    pub mean_value: f64,
    /// 📂 Base name of the file this product came from, e.g. `a.xml`.
    pub source_file: String,
    /// 🔢 How many metric values actually made it into the mean.
    pub metric_count: usize,
}

impl ProductMetric {
    /// 🧮 Builds a record from the collected values. `None` if there is nothing to average,
    /// because dividing by zero is how NaN gets into production.
    pub(crate) fn from_values<'a>(
        product_id: String,
        source_file: String,
        values: impl IntoIterator<Item = &'a f64>,
    ) -> Option<Self> {
        let (sum, count) = values
            .into_iter()
            .fold((0.0_f64, 0usize), |(sum, count), value| (sum + value, count + 1));
        if count == 0 {
            return None;
        }
        Some(Self {
            product_id,
            mean_value: sum / count as f64,
            source_file,
            metric_count: count,
        })
    }
}

/// 📂 The base name of a path, lossily stringified. `a/b/c.xml` → `c.xml`.
/// Falls back to the whole path when there is no file name (looking at you, `..`).
pub(crate) fn source_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_two_values_average_like_civilized_numbers() {
        let metric = ProductMetric::from_values("P1".into(), "a.xml".into(), &[10.0, 20.0])
            .expect("💀 two values should make a mean");
        assert_eq!(metric.mean_value, 15.0);
        assert_eq!(metric.metric_count, 2);
        assert_eq!(metric.source_file, "a.xml");
    }

    #[test]
    fn the_one_where_no_values_means_no_record() {
        let nothing: [f64; 0] = [];
        assert!(ProductMetric::from_values("P1".into(), "a.xml".into(), &nothing).is_none());
    }

    #[test]
    fn the_one_where_the_directory_part_is_left_at_the_door() {
        assert_eq!(source_file_name(Path::new("/data/incoming/a.xml")), "a.xml");
        assert_eq!(source_file_name(Path::new("b.xml")), "b.xml");
    }
}
