/// Derived search/filter view over the card collection.
///
/// Text matching is a case-insensitive, diacritic-insensitive substring test
/// against title and body; the label filter requires the card's label set to
/// be a superset of the active labels. Both are recomputed on demand and
/// never mutate the collection.
use unicode_normalization::UnicodeNormalization;

use crate::types::Card;

/// Fold case and strip combining marks, so "Café" matches "cafe".
fn normalize(text: &str) -> String {
    text.nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Does one card pass the filter? An empty query matches everything; an
/// empty label set filters nothing out.
pub fn matches(card: &Card, query: &str, active_labels: &[String]) -> bool {
    if !active_labels
        .iter()
        .all(|label| card.labels.contains(label))
    {
        return false;
    }
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    let needle = normalize(query);
    normalize(&card.title).contains(&needle) || normalize(&card.body).contains(&needle)
}

/// Filter a collection, preserving its order.
pub fn filter<'a>(cards: &'a [Card], query: &str, active_labels: &[String]) -> Vec<&'a Card> {
    cards
        .iter()
        .filter(|card| matches(card, query, active_labels))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now;

    fn card(title: &str, body: &str, labels: &[&str]) -> Card {
        let ts = now();
        Card {
            id: "a1b2c3d4".to_string(),
            title: title.to_string(),
            column: "todo".to_string(),
            position: "n".to_string(),
            created: ts,
            modified: ts,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_case_insensitive_title_and_body() {
        let c = card("Fix Login", "the OAuth flow", &[]);
        assert!(matches(&c, "fix", &[]));
        assert!(matches(&c, "oauth", &[]));
        assert!(!matches(&c, "logout", &[]));
    }

    #[test]
    fn test_diacritic_insensitive() {
        let c = card("Café menu", "", &[]);
        assert!(matches(&c, "cafe", &[]));
    }

    #[test]
    fn test_label_superset() {
        let c = card("X", "", &["bug", "urgent"]);
        assert!(matches(&c, "", &["bug".to_string()]));
        assert!(matches(&c, "", &["bug".to_string(), "urgent".to_string()]));
        assert!(!matches(&c, "", &["bug".to_string(), "later".to_string()]));
    }

    #[test]
    fn test_query_and_labels_intersect() {
        let c = card("Fix Login", "", &["bug"]);
        assert!(matches(&c, "fix", &["bug".to_string()]));
        assert!(!matches(&c, "fix", &["later".to_string()]));
        assert!(!matches(&c, "nope", &["bug".to_string()]));
    }

    #[test]
    fn test_empty_query_matches_all() {
        let cards = vec![card("A", "", &[]), card("B", "", &[])];
        assert_eq!(filter(&cards, "", &[]).len(), 2);
        assert_eq!(filter(&cards, "  ", &[]).len(), 2);
    }
}
