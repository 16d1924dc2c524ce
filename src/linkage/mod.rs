//! Term-linkage extraction: scan a document corpus for a controlled
//! vocabulary and keep only the terms predominant enough to be what the
//! document is actually about.

pub mod matcher;
pub mod outliers;

use crate::error::Result;
use std::collections::HashMap;

/// Controlled vocabulary: surface term mapped to its external identifier.
pub type Vocabulary = HashMap<String, String>;

/// Scans every document for every vocabulary term and returns the
/// predominant ones with their external identifiers. Place-name and
/// commodity-name extraction both come through here; the caller picks the
/// vocabulary and lowercases the corpus first when it wants
/// case-insensitive matching.
pub fn extract_linked_terms<S: AsRef<str>>(
    documents: &[S],
    vocabulary: &Vocabulary,
) -> Result<HashMap<String, String>> {
    let terms: Vec<&str> = vocabulary.keys().map(String::as_str).collect();
    let tally = matcher::tally_terms(documents, &terms)?;
    let outliers = outliers::outlier_terms(&tally);

    Ok(vocabulary
        .iter()
        .filter(|(term, _)| outliers.contains(term.as_str()))
        .map(|(term, id)| (term.clone(), id.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocabulary(entries: &[(&str, &str)]) -> Vocabulary {
        entries
            .iter()
            .map(|(term, id)| (term.to_string(), id.to_string()))
            .collect()
    }

    #[test]
    fn linked_terms_carry_their_external_ids() {
        let vocab = vocabulary(&[
            ("gold", "Q744"),
            ("silver", "Q745"),
            ("copper", "Q746"),
            ("zinc", "Q747"),
            ("nickel", "Q748"),
            ("lead", "Q749"),
        ]);
        // "gold" dominates; the rest appear once each.
        let corpus = [
            "gold gold gold gold gold gold gold gold gold gold",
            "gold gold gold gold gold gold gold gold gold gold",
            "silver copper zinc nickel lead",
        ];

        let linked = extract_linked_terms(&corpus, &vocab).unwrap();

        assert_eq!(linked.get("gold").map(String::as_str), Some("Q744"));
        assert_eq!(linked.len(), 1);
    }

    #[test]
    fn output_is_subset_of_vocabulary() {
        let vocab = vocabulary(&[("gold", "Q744"), ("silver", "Q745")]);
        let corpus = ["gold and silver and iron and tungsten"];

        let linked = extract_linked_terms(&corpus, &vocab).unwrap();
        for term in linked.keys() {
            assert!(vocab.contains_key(term));
        }
    }

    #[test]
    fn uniform_corpus_links_nothing() {
        let vocab = vocabulary(&[("gold", "Q744"), ("silver", "Q745")]);
        let corpus = ["gold silver", "gold silver"];

        assert!(extract_linked_terms(&corpus, &vocab).unwrap().is_empty());
    }

    #[test]
    fn empty_vocabulary_links_nothing() {
        let corpus = ["gold silver"];
        assert!(extract_linked_terms(&corpus, &Vocabulary::new())
            .unwrap()
            .is_empty());
    }
}
