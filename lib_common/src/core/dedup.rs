//! Composite-key membership test used by the store.
//!
//! The store never grows past its capacity, so a linear scan is all this
//! needs. It is only called with the store's lock held.

use crate::core::record::PetRecord;

/// True if `records` already holds an entry with the candidate's `(name, job_id)`.
pub fn contains_key(records: &[PetRecord], candidate: &PetRecord) -> bool {
    records.iter().any(|existing| existing.same_key(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::test_record as record;

    #[test]
    fn matches_only_on_both_name_and_job_id() {
        let records = vec![record("Fox", "j1"), record("Owl", "j2")];
        assert!(contains_key(&records, &record("Fox", "j1")));
        assert!(!contains_key(&records, &record("Fox", "j2")));
        assert!(!contains_key(&records, &record("Owl", "j1")));
        assert!(!contains_key(&[], &record("Fox", "j1")));
    }
}
