use std::collections::HashSet;

use arsa_core::{GeoKey, RawRecord};

/// Keeps the first record seen for each GeoKey, preserving input order. Later
/// duplicates are dropped as-is; nothing is merged into the survivor.
pub fn dedupe(records: Vec<RawRecord>) -> Vec<RawRecord> {
    let mut seen: HashSet<GeoKey> = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| seen.insert(GeoKey::from_record(record)))
        .collect()
}
