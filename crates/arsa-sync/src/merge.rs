use std::collections::HashSet;

use arsa_core::{Listing, ListingDraft};

/// Smallest id greater than every id in `catalog`; 1 for an empty catalog.
pub fn next_id(catalog: &[Listing]) -> u64 {
    catalog.iter().map(|listing| listing.id).max().unwrap_or(0) + 1
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub catalog: Vec<Listing>,
    /// Index in `catalog` where the appended listings start.
    pub first_new: usize,
}

impl MergeOutcome {
    pub fn appended(&self) -> &[Listing] {
        &self.catalog[self.first_new..]
    }
}

/// Appends drafts to `existing` with consecutive ids starting at `next_id(existing)`.
/// Existing listings are carried over untouched and in order.
pub fn merge(existing: Vec<Listing>, drafts: Vec<ListingDraft>) -> MergeOutcome {
    let first_id = next_id(&existing);
    let first_new = existing.len();
    let mut catalog = existing;
    catalog.reserve(drafts.len());
    catalog.extend(
        drafts
            .into_iter()
            .zip(first_id..)
            .map(|(draft, id)| Listing::from_draft(id, draft)),
    );
    MergeOutcome { catalog, first_new }
}

/// Locations of drafts that already appear in the catalog. Merging does not dedupe
/// across runs, so these end up listed twice.
pub fn overlapping_locations(existing: &[Listing], drafts: &[ListingDraft]) -> Vec<String> {
    let known: HashSet<&str> = existing.iter().map(|listing| listing.location.as_str()).collect();
    drafts
        .iter()
        .map(|draft| draft.fields.location.as_str())
        .filter(|location| known.contains(location))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arsa_core::{GeoKey, NormalizedFields};

    fn draft(neighborhood: &str, price: i64) -> ListingDraft {
        let geo = GeoKey::new("Balıkesir", "Sındırgı", neighborhood);
        ListingDraft {
            fields: NormalizedFields {
                title: "Yatırımlık Fırsat - Sındırgı".into(),
                location: geo.location(),
                size_label: "1.000 m²".into(),
                description: "d".into(),
                features: vec!["Yatırımlık".into()],
                area_value: 1000.0,
                cadastral_block: "101".into(),
                cadastral_parcel: "5".into(),
                geo,
            },
            price,
        }
    }

    fn existing(id: u64) -> Listing {
        let mut listing = Listing::from_draft(id, draft("Alhan", 1_500_000));
        listing.image_url = Some("http://bereketlitopraklar.com.tr/alhan.jpg".into());
        listing
            .extra
            .insert("featured".into(), serde_json::Value::Bool(true));
        listing
    }

    #[test]
    fn next_id_follows_the_maximum() {
        assert_eq!(next_id(&[]), 1);
        assert_eq!(next_id(&[existing(1), existing(9), existing(4)]), 10);
    }

    #[test]
    fn appends_after_existing_and_keeps_them_identical() {
        let before = existing(1);
        let outcome = merge(vec![before.clone()], vec![draft("Kayapa", 1), draft("Tepecik", 2)]);
        let ids: Vec<u64> = outcome.catalog.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(outcome.catalog[0], before);
        assert_eq!(outcome.first_new, 1);
        assert_eq!(outcome.appended().len(), 2);
        assert_eq!(outcome.appended()[0].neighborhood(), "Kayapa");
        assert!(outcome.appended()[0].image_url.is_none());
    }

    #[test]
    fn empty_catalog_starts_at_one() {
        let outcome = merge(Vec::new(), vec![draft("Kayapa", 1)]);
        assert_eq!(outcome.catalog[0].id, 1);
        assert_eq!(outcome.first_new, 0);
    }

    #[test]
    fn ids_are_never_reused_after_gaps() {
        let outcome = merge(vec![existing(2), existing(7)], vec![draft("A", 1), draft("B", 1), draft("C", 1)]);
        let ids: Vec<u64> = outcome.appended().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![8, 9, 10]);
    }

    #[test]
    fn no_drafts_leaves_catalog_unchanged() {
        let outcome = merge(vec![existing(1)], Vec::new());
        assert_eq!(outcome.catalog, vec![existing(1)]);
        assert!(outcome.appended().is_empty());
    }

    #[test]
    fn reports_locations_already_in_catalog() {
        let overlap = overlapping_locations(&[existing(1)], &[draft("Alhan", 1), draft("Kayapa", 1)]);
        assert_eq!(overlap, vec!["Alhan, Sındırgı, Balıkesir".to_string()]);
    }
}
