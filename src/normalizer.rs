use crate::model::{RawPost, SentimentItem};

/// Likes, reposts and replies summed into one engagement figure.
pub fn engagement(post: &RawPost) -> f64 {
    post.likes.saturating_add(post.retweets).saturating_add(post.replies) as f64
}

/// How many posts get sent for scoring: a third of the fetched cap, kept within 10..=15.
pub fn selection_size(max_posts: usize) -> usize {
    (max_posts / 3).clamp(10, 15)
}

/// Highest-engagement posts first; ties keep feed order.
pub fn select_top_posts(mut posts: Vec<RawPost>, max_posts: usize) -> Vec<RawPost> {
    posts.sort_by(|a, b| engagement(b).total_cmp(&engagement(a)));
    posts.truncate(selection_size(max_posts));
    posts
}

pub fn to_sentiment_item(post: &RawPost, score: f64) -> SentimentItem {
    SentimentItem {
        text: post.text.clone(),
        score,
        engagement: engagement(post),
        timestamp: post.timestamp,
    }
}
