//! Query set derivation
//!
//! Turns a market's title, description and tags into the search terms used to
//! select social posts. The derivation is a pure function of those fields.

use super::aliases;
use crate::market::Market;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Words that never start an entity and never form a phrase
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "all", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "below", "between", "by", "can", "did", "do", "does", "during", "end", "for",
    "from", "had", "has", "have", "he", "her", "his", "how", "i", "if", "in", "into", "is", "it",
    "its", "less", "market", "more", "no", "not", "of", "on", "or", "other", "out", "over",
    "resolve", "resolves", "she", "should", "so", "than", "that", "the", "their", "then",
    "there", "these", "they", "this", "those", "to", "under", "until", "up", "was", "were",
    "what", "when", "which", "who", "will", "win", "with", "would", "yes",
];

/// Default number of key phrases kept per market
pub const DEFAULT_MAX_PHRASES: usize = 10;

/// Search terms for one market
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySet {
    pub market_id: String,
    /// Named entities, original casing
    pub entities: Vec<String>,
    /// `#`-prefixed casefolded hashtags
    pub hashtags: Vec<String>,
    pub aliases: Vec<String>,
    /// Casefolded title followed by key bigrams
    pub phrases: Vec<String>,
}

impl QuerySet {
    /// Entities, aliases and phrases in that order
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.entities
            .iter()
            .chain(self.aliases.iter())
            .chain(self.phrases.iter())
            .map(String::as_str)
    }

    /// Boolean OR query for live search endpoints
    ///
    /// Entities first, then aliases, then key bigrams (the full title is
    /// skipped); multi-word terms are quoted.
    pub fn search_query(&self, max_terms: usize) -> String {
        let bigrams = self.phrases.iter().skip(1);
        let mut terms: Vec<String> = Vec::new();
        for term in self.entities.iter().chain(self.aliases.iter()).chain(bigrams) {
            if terms.len() >= max_terms {
                break;
            }
            let term = term.replace('"', "");
            let rendered = if term.contains(' ') {
                format!("\"{term}\"")
            } else {
                term
            };
            if !terms.iter().any(|t| t.eq_ignore_ascii_case(&rendered)) {
                terms.push(rendered);
            }
        }
        terms.join(" OR ")
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.hashtags.is_empty()
            && self.aliases.is_empty()
            && self.phrases.is_empty()
    }

    /// Whether a post's text or explicit hashtags hit any term of the set
    ///
    /// Terms shorter than four characters only match whole words so that
    /// "us" does not match "because".
    pub fn matches(&self, text: &str, hashtags: &[String]) -> bool {
        let haystack = text.to_lowercase();

        let term_hit = self.terms().any(|term| {
            let needle = term.to_lowercase();
            if needle.chars().count() < 4 {
                contains_word(&haystack, &needle)
            } else {
                haystack.contains(&needle)
            }
        });
        if term_hit {
            return true;
        }

        hashtags
            .iter()
            .map(String::as_str)
            .chain(haystack.split_whitespace().filter(|t| t.starts_with('#')))
            .filter_map(normalize_hashtag)
            .any(|tag| self.hashtags.contains(&tag))
    }
}

/// Builds [`QuerySet`]s from market metadata
#[derive(Debug, Clone)]
pub struct QuerySetBuilder {
    max_phrases: usize,
}

impl Default for QuerySetBuilder {
    fn default() -> Self {
        Self {
            max_phrases: DEFAULT_MAX_PHRASES,
        }
    }
}

impl QuerySetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on the number of key bigrams
    pub fn with_max_phrases(mut self, max_phrases: usize) -> Self {
        self.max_phrases = max_phrases;
        self
    }

    /// Build the query set of a market
    pub fn build(&self, market: &Market) -> QuerySet {
        self.build_from(&market.id, &market.title, &market.description, &market.tags)
    }

    /// Build a query set from raw fields
    pub fn build_from(
        &self,
        market_id: &str,
        title: &str,
        description: &str,
        tags: &BTreeSet<String>,
    ) -> QuerySet {
        let mut entities = Vec::new();
        entity_runs(title, &mut entities);
        entity_runs(description, &mut entities);
        for tag in tags {
            let tag = tag.trim();
            if !tag.is_empty() {
                push_unique(&mut entities, tag.to_string());
            }
        }

        let mut alias_terms = Vec::new();
        for entity in &entities {
            let whole = entity.to_lowercase();
            let candidates = std::iter::once(whole.as_str()).chain(whole.split_whitespace());
            for candidate in candidates {
                for alias in aliases::expand(candidate) {
                    if !contains_folded(&entities, alias) {
                        push_unique(&mut alias_terms, alias.to_string());
                    }
                }
            }
        }

        let mut hashtags = Vec::new();
        let sources = entities
            .iter()
            .chain(alias_terms.iter())
            .chain(tags.iter())
            .map(String::as_str);
        for source in sources {
            if let Some(tag) = normalize_hashtag(source) {
                push_unique(&mut hashtags, tag);
            }
        }
        for word in words(title) {
            if word.chars().count() >= 3 && !is_stopword(&word) {
                if let Some(tag) = normalize_hashtag(&word) {
                    push_unique(&mut hashtags, tag);
                }
            }
        }

        let mut phrases = Vec::new();
        let primary = title.trim().to_lowercase();
        if !primary.is_empty() {
            phrases.push(primary);
        }
        let all_words: Vec<String> = words(title).chain(words(description)).collect();
        let mut bigrams = 0;
        for pair in all_words.windows(2) {
            if bigrams >= self.max_phrases {
                break;
            }
            if is_stopword(&pair[0]) || is_stopword(&pair[1]) {
                continue;
            }
            let phrase = format!("{} {}", pair[0], pair[1]);
            if !phrases.contains(&phrase) {
                phrases.push(phrase);
                bigrams += 1;
            }
        }

        QuerySet {
            market_id: market_id.to_string(),
            entities,
            hashtags,
            aliases: alias_terms,
            phrases,
        }
    }
}

fn is_stopword(word: &str) -> bool {
    let folded = word.to_lowercase();
    STOPWORDS.binary_search(&folded.as_str()).is_ok()
}

/// Token with leading and trailing punctuation removed
fn clean(raw: &str) -> &str {
    raw.trim_matches(|c: char| !c.is_alphanumeric())
}

/// Casefolded, punctuation-trimmed, non-empty words
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(clean)
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Collect runs of consecutive capitalized tokens
fn entity_runs(text: &str, out: &mut Vec<String>) {
    let mut run: Vec<&str> = Vec::new();

    for raw in text.split_whitespace() {
        let token = clean(raw);
        let capitalized = token.chars().next().is_some_and(char::is_uppercase);

        if capitalized && !(run.is_empty() && is_stopword(token)) {
            run.push(token);
            // trailing punctuation closes the run
            if raw.ends_with([',', '.', '?', '!', ';', ':', ')']) {
                flush_run(&mut run, out);
            }
        } else {
            flush_run(&mut run, out);
        }
    }
    flush_run(&mut run, out);
}

fn flush_run(run: &mut Vec<&str>, out: &mut Vec<String>) {
    if !run.is_empty() {
        push_unique(out, run.join(" "));
        run.clear();
    }
}

/// `#` + casefolded alphanumerics of `term`
fn normalize_hashtag(term: &str) -> Option<String> {
    let body: String = term
        .trim_start_matches('#')
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    (!body.is_empty()).then(|| format!("#{body}"))
}

fn contains_folded(list: &[String], item: &str) -> bool {
    list.iter().any(|existing| existing.eq_ignore_ascii_case(item))
}

/// Append unless an equal (case-insensitive) entry exists
fn push_unique(list: &mut Vec<String>, item: String) {
    if !contains_folded(list, &item) {
        list.push(item);
    }
}

/// Whole-word occurrence of `needle` in `haystack`
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(i, m)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + m.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
