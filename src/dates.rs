use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Textual shapes a date can take in report front matter.
static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b\d{4}-\d{2}-\d{2}\b",                  // YYYY-MM-DD
        r"\b\d{2}/\d{2}/\d{4}\b",                  // MM/DD/YYYY
        r"\b\d{2}-\d{2}-\d{4}\b",                  // DD-MM-YYYY
        r"\b\d{1,2} \w+ \d{4}\b",                  // D Month YYYY
        r"\b\w+ \d{1,2}, \d{4}\b",                 // Month D, YYYY
        r"\b\d{1,2}(?:st|nd|rd|th)? \w+ \d{4}\b",  // D(th) Month YYYY
        r"\b\w+ \d{1,2}(?:st|nd|rd|th)?, \d{4}\b", // Month D(th), YYYY
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static ORDINAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})(?:st|nd|rd|th)\b").unwrap());

/// Formats tried against each candidate, month-first before day-first so
/// ambiguous numeric dates resolve the way the filing jurisdictions write
/// them.
const CANDIDATE_FORMATS: [&str; 8] = [
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

fn parse_candidate(raw: &str) -> Option<NaiveDate> {
    let cleaned = ORDINAL_SUFFIX.replace_all(raw, "$1");
    for format in &CANDIDATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, format) {
            return Some(date);
        }
    }
    None
}

/// Finds every date-shaped substring in the text, keeps the candidates that
/// validate as calendar dates, and returns the most recent one. Candidates
/// that fail to parse are dropped silently; a text with no parseable date
/// yields `None` rather than an error.
pub fn most_recent_date(text: &str) -> Option<NaiveDate> {
    let mut candidates: HashSet<String> = HashSet::new();
    for pattern in DATE_PATTERNS.iter() {
        for m in pattern.find_iter(text) {
            candidates.insert(m.as_str().to_string());
        }
    }

    candidates
        .iter()
        .filter_map(|c| parse_candidate(c))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn picks_the_most_recent_amendment_date() {
        let text = "Filed 1 January, 2023 and amended March 3rd, 2023";
        assert_eq!(most_recent_date(text), Some(date(2023, 3, 3)));
    }

    #[test]
    fn no_recognizable_date_yields_none() {
        assert_eq!(most_recent_date("effective as of the signing ceremony"), None);
    }

    #[test]
    fn most_recent_wins_across_formats() {
        let text = "Report dated 2020-01-15, revised 03/20/2021.";
        assert_eq!(most_recent_date(text), Some(date(2021, 3, 20)));
    }

    #[test]
    fn invalid_candidates_are_discarded_not_fatal() {
        // 13/45/2023 matches the numeric pattern but is no calendar date.
        let text = "stamped 13/45/2023, signed 5 March 2019";
        assert_eq!(most_recent_date(text), Some(date(2019, 3, 5)));
    }

    #[test]
    fn numeric_dates_disambiguate_month_first() {
        assert_eq!(most_recent_date("dated 05/04/2023"), Some(date(2023, 5, 4)));
    }

    #[test]
    fn day_first_is_a_fallback_for_impossible_months() {
        assert_eq!(most_recent_date("dated 25-12-2023"), Some(date(2023, 12, 25)));
    }

    #[test]
    fn ordinal_suffixes_are_accepted() {
        assert_eq!(
            most_recent_date("effective the 21st August 2024"),
            Some(date(2024, 8, 21))
        );
    }

    #[test]
    fn duplicate_candidates_collapse() {
        let text = "March 3, 2023 ... March 3, 2023 ... 2023-03-03";
        assert_eq!(most_recent_date(text), Some(date(2023, 3, 3)));
    }
}
