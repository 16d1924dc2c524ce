use crate::error::{ArchiveError, Result};
use aho_corasick::AhoCorasick;
use std::collections::HashMap;

/// Occurrence count per term across a whole corpus.
pub type MatchTally = HashMap<String, u64>;

/// Counts every occurrence of every term across all documents in a single
/// scan per document. The automaton is built once over the full term slate,
/// so the cost is O(total text length + total matches) no matter how large
/// the vocabulary gets. Overlapping hits for different terms all count.
///
/// Matching is exact substring matching on the terms as given; callers that
/// want case-insensitive behavior lowercase both sides before calling.
pub fn tally_terms<S, T>(documents: &[S], terms: &[T]) -> Result<MatchTally>
where
    S: AsRef<str>,
    T: AsRef<str>,
{
    if terms.is_empty() {
        return Ok(MatchTally::new());
    }

    let automaton = AhoCorasick::new(terms.iter().map(|t| t.as_ref()))
        .map_err(|e| ArchiveError::Validation(format!("Failed to build term automaton: {e}")))?;

    let mut counts: Vec<u64> = vec![0; terms.len()];
    for doc in documents {
        for hit in automaton.find_overlapping_iter(doc.as_ref()) {
            counts[hit.pattern().as_usize()] += 1;
        }
    }

    let mut tally = MatchTally::new();
    for (term, count) in terms.iter().zip(counts) {
        if count > 0 {
            tally.insert(term.as_ref().to_string(), count);
        }
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_all_occurrences_across_documents() {
        let docs = ["gold and copper", "gold gold", "no metals here"];
        let tally = tally_terms(&docs, &["gold", "copper"]).unwrap();

        assert_eq!(tally.get("gold"), Some(&3));
        assert_eq!(tally.get("copper"), Some(&1));
        assert_eq!(tally.len(), 2);
    }

    #[test]
    fn overlapping_terms_all_count() {
        let docs = ["British Columbia"];
        let tally = tally_terms(&docs, &["British Columbia", "Columbia"]).unwrap();

        assert_eq!(tally.get("British Columbia"), Some(&1));
        assert_eq!(tally.get("Columbia"), Some(&1));
    }

    #[test]
    fn empty_vocabulary_yields_empty_tally() {
        let docs = ["some text"];
        let tally = tally_terms::<_, &str>(&docs, &[]).unwrap();
        assert!(tally.is_empty());
    }

    #[test]
    fn empty_corpus_yields_empty_tally() {
        let docs: [&str; 0] = [];
        let tally = tally_terms(&docs, &["gold"]).unwrap();
        assert!(tally.is_empty());
    }

    #[test]
    fn tally_is_order_independent() {
        let forward = ["gold silver", "silver", "gold gold"];
        let backward = ["gold gold", "silver", "gold silver"];
        let terms = ["gold", "silver"];

        assert_eq!(
            tally_terms(&forward, &terms).unwrap(),
            tally_terms(&backward, &terms).unwrap()
        );
    }

    #[test]
    fn unmatched_terms_are_absent() {
        let docs = ["gold"];
        let tally = tally_terms(&docs, &["gold", "uranium"]).unwrap();
        assert!(!tally.contains_key("uranium"));
    }
}
