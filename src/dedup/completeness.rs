//! Completeness score and canonical selection among duplicates.

use std::cmp::Ordering;

use crate::model::NewsArticle;

const W_TITLE: u32 = 10;
const W_CONTENT: u32 = 20;
const W_SOURCE: u32 = 5;
const W_SENTIMENT: u32 = 10;
const W_INSTRUMENTS: u32 = 10;
const W_LEN_500: u32 = 15;
const W_LEN_1000: u32 = 15;
const W_IMPORTANCE: u32 = 15;

/// Sum of fixed weights for each present/qualifying field.
pub fn completeness_score(a: &NewsArticle) -> u32 {
    let content_len = a.content.trim().chars().count();
    let mut score = 0;
    if !a.title.trim().is_empty() {
        score += W_TITLE;
    }
    if content_len > 0 {
        score += W_CONTENT;
    }
    if !a.source.trim().is_empty() {
        score += W_SOURCE;
    }
    if a.sentiment_score.is_some() {
        score += W_SENTIMENT;
    }
    if !a.related_instruments.is_empty() {
        score += W_INSTRUMENTS;
    }
    if content_len >= 500 {
        score += W_LEN_500;
    }
    if content_len >= 1000 {
        score += W_LEN_1000;
    }
    if a.importance_level.is_some() {
        score += W_IMPORTANCE;
    }
    score
}

/// Which of two duplicates to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonical {
    Existing,
    Incoming,
}

/// Higher completeness wins; ties go to the newer `created_at`, then to the
/// existing record.
pub fn choose_canonical(existing: &NewsArticle, incoming: &NewsArticle) -> Canonical {
    let order = completeness_score(incoming)
        .cmp(&completeness_score(existing))
        .then(incoming.created_at.cmp(&existing.created_at));
    match order {
        Ordering::Greater => Canonical::Incoming,
        _ => Canonical::Existing,
    }
}

/// The most complete article of a non-empty slice (same ordering as
/// [`choose_canonical`]).
pub fn most_complete(articles: &[NewsArticle]) -> Option<&NewsArticle> {
    articles.iter().reduce(|best, next| match choose_canonical(best, next) {
        Canonical::Incoming => next,
        Canonical::Existing => best,
    })
}
