use crate::batch::EnrichmentRecord;
use serde::Serialize;
use serde_json::Value;

/// Input of the tweet scraper actor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorInput<'a> {
    #[serde(rename = "tweetIDs")]
    pub tweet_ids: &'a [String],
    pub max_items: usize,
    pub query_type: &'static str,
}

impl<'a> ActorInput<'a> {
    pub fn latest(tweet_ids: &'a [String]) -> Self {
        Self {
            tweet_ids,
            max_items: tweet_ids.len(),
            query_type: "Latest",
        }
    }
}

fn text_field(item: &Value, key: &str) -> Option<String> {
    match &item[key] {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Converts one dataset item, `None` when it carries no id.
pub fn item_to_record(item: Value) -> Option<EnrichmentRecord> {
    let identifier = text_field(&item, "id")?;
    let timestamp = text_field(&item, "created_at")
        .or_else(|| text_field(&item, "createdAt"))
        .unwrap_or_default();
    Some(EnrichmentRecord {
        identifier,
        timestamp,
        payload: item,
    })
}
