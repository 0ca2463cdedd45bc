//! Keyword relevance search over the item table.
//!
//! Scores are weighted keyword-match counts: a title hit outweighs a
//! description hit, and each matching tag counts in between. Results are
//! sorted by score with a stable sort, so equal scores keep item-table
//! (creation) order.

use crate::model::Item;
use crate::store::Store;
use std::sync::Arc;

const TITLE_WEIGHT: u32 = 3;
const DESCRIPTION_WEIGHT: u32 = 1;
const TAG_WEIGHT: u32 = 2;

pub struct SearchEngine {
    store: Arc<Store>,
}

impl SearchEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Rank items against the query, most relevant first, at most
    /// `max_results` of them. An empty category matches every item;
    /// otherwise the item's category must match case-insensitively.
    pub async fn search(&self, query: &str, category: &str, max_results: usize) -> Vec<Item> {
        let items = self.store.all_items().await;
        rank(items, query, category, max_results)
    }
}

pub(crate) fn rank(items: Vec<Item>, query: &str, category: &str, max_results: usize) -> Vec<Item> {
    let keywords: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();
    let category = category.to_lowercase();

    let mut matched: Vec<(u32, Item)> = items
        .into_iter()
        .filter(|item| category.is_empty() || item.category.to_lowercase() == category)
        .filter_map(|item| {
            let score = score_item(&item, &keywords);
            (score > 0).then_some((score, item))
        })
        .collect();

    matched.sort_by(|a, b| b.0.cmp(&a.0));
    matched.truncate(max_results);
    matched.into_iter().map(|(_, item)| item).collect()
}

fn score_item(item: &Item, keywords: &[String]) -> u32 {
    let title = item.title.to_lowercase();
    let description = item.description.to_lowercase();

    keywords
        .iter()
        .map(|kw| {
            let mut score = 0;
            if title.contains(kw.as_str()) {
                score += TITLE_WEIGHT;
            }
            if description.contains(kw.as_str()) {
                score += DESCRIPTION_WEIGHT;
            }
            let tag_hits = item
                .tags
                .iter()
                .filter(|tag| tag.to_lowercase().contains(kw.as_str()))
                .count() as u32;
            score + TAG_WEIGHT * tag_hits
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, title: &str, description: &str, category: &str, tags: &[&str]) -> Item {
        Item::new(
            id.to_string(),
            "seller",
            title,
            description,
            category,
            10.0,
            tags.iter().map(|t| t.to_string()).collect(),
        )
    }

    #[test]
    fn test_title_outranks_description_and_tags() {
        let items = vec![
            item("1", "old desk", "a lamp in the photo", "Home", &[]),
            item("2", "desk lamp", "bright", "Home", &[]),
            item("3", "chair", "no match here", "Home", &["lamp"]),
        ];
        let ranked = rank(items, "lamp", "", 10);
        let ids: Vec<&str> = ranked.iter().map(|i| i.item_id.as_str()).collect();
        // title hit (3) > tag hit (2) > description hit (1)
        assert_eq!(ids, vec!["2", "3", "1"]);
    }

    #[test]
    fn test_score_is_monotonic_in_title_matches() {
        let without = item("1", "plain desk", "wooden desk", "Home", &[]);
        let with = item("2", "lamp desk", "wooden desk", "Home", &[]);
        let keywords = vec!["lamp".to_string(), "desk".to_string()];
        assert!(score_item(&with, &keywords) > score_item(&without, &keywords));
    }

    #[test]
    fn test_each_matching_tag_counts() {
        let one_tag = item("1", "x", "y", "Home", &["lamp"]);
        let two_tags = item("2", "x", "y", "Home", &["lamp", "lamplight"]);
        let keywords = vec!["lamp".to_string()];
        assert_eq!(score_item(&one_tag, &keywords), 2);
        assert_eq!(score_item(&two_tags, &keywords), 4);
    }

    #[test]
    fn test_equal_scores_keep_creation_order() {
        let items = vec![
            item("1", "lamp", "", "Home", &[]),
            item("2", "lamp", "", "Home", &[]),
            item("3", "lamp", "", "Home", &[]),
        ];
        let ranked = rank(items, "lamp", "", 10);
        let ids: Vec<&str> = ranked.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_category_filter_is_case_insensitive() {
        let items = vec![
            item("1", "lamp", "", "Home", &[]),
            item("2", "lamp", "", "Electronics", &[]),
        ];
        let ranked = rank(items, "lamp", "electronics", 10);
        let ids: Vec<&str> = ranked.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["2"]);
    }

    #[test]
    fn test_truncates_to_max_results() {
        let items = vec![
            item("1", "lamp one", "", "Home", &[]),
            item("2", "lamp two", "", "Home", &[]),
            item("3", "lamp three", "", "Home", &[]),
        ];
        assert_eq!(rank(items, "lamp", "", 2).len(), 2);
    }

    #[test]
    fn test_empty_query_and_no_hits() {
        let items = vec![item("1", "lamp", "", "Home", &[])];
        assert!(rank(items.clone(), "", "", 10).is_empty());
        assert!(rank(items, "zebra", "", 10).is_empty());
    }
}
