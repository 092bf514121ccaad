//! Projection of raw platform responses into entity schemas.
//!
//! GraphQL responses nest result objects at varying depths depending on the
//! operation (timeline instructions, entries, items, `tweet_results`,
//! `user_results`...). Rather than modelling every envelope, the walker
//! visits the whole document and picks out objects by `__typename`.

use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;
use xb_core::types::{
    parse_epoch_millis, parse_platform_timestamp, DirectMessage, Media, Tweet, User, UserRef,
};

use crate::platform::{PlatformError, Result};

/// Fail on an `errors` array when no usable `data` came with it.
///
/// Partial results (data plus errors) are common on timelines and are
/// accepted with a warning.
pub fn check_errors(body: &Value) -> Result<()> {
    let messages: Vec<String> = body
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default();

    if messages.is_empty() {
        return Ok(());
    }

    let has_data = body
        .get("data")
        .is_some_and(|d| d.as_object().is_some_and(|o| !o.is_empty()));
    if has_data {
        warn!(errors = %messages.join("; "), "partial API response");
        Ok(())
    } else {
        Err(PlatformError::Api(messages.join("; ")))
    }
}

/// First error message in a response body, if any.
pub fn first_error_message(body: &Value) -> Option<String> {
    body.get("errors")?
        .as_array()?
        .first()?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

/// Every tweet result object in document order, without duplicates.
///
/// A matched tweet's own subtree (quoted tweet, retweeted status) is not
/// searched further.
pub fn collect_tweets(body: &Value) -> Vec<Tweet> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    walk(body, &mut |node| match typename(node) {
        Some("Tweet") => {
            if let Some(tweet) = parse_tweet(node) {
                if seen.insert(tweet.id.clone()) {
                    out.push(tweet);
                }
            }
            true
        }
        Some("TweetWithVisibilityResults") => {
            if let Some(tweet) = node.get("tweet").and_then(parse_tweet) {
                if seen.insert(tweet.id.clone()) {
                    out.push(tweet);
                }
            }
            true
        }
        _ => false,
    });
    out
}

/// Every user result object in document order, without duplicates.
pub fn collect_users(body: &Value) -> Vec<User> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    walk(body, &mut |node| {
        if typename(node) != Some("User") {
            return false;
        }
        if let Some(user) = parse_user(node) {
            if seen.insert(user.id.clone()) {
                out.push(user);
            }
        }
        true
    });
    out
}

/// Depth-first visit. `visit` returns true when it consumed the node, in
/// which case its children are skipped.
fn walk(node: &Value, visit: &mut dyn FnMut(&Value) -> bool) {
    match node {
        Value::Object(map) => {
            if visit(node) {
                return;
            }
            for child in map.values() {
                walk(child, visit);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, visit);
            }
        }
        _ => {}
    }
}

fn typename(node: &Value) -> Option<&str> {
    node.get("__typename").and_then(Value::as_str)
}

fn str_at<'a>(node: &'a Value, pointer: &str) -> Option<&'a str> {
    node.pointer(pointer).and_then(Value::as_str)
}

fn u64_at(node: &Value, pointer: &str) -> Option<u64> {
    let v = node.pointer(pointer)?;
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

// ---------------------------------------------------------------------------
// Entity parsers
// ---------------------------------------------------------------------------

/// Parse a GraphQL `Tweet` result object.
pub fn parse_tweet(node: &Value) -> Option<Tweet> {
    let id = str_at(node, "/rest_id")?;
    let legacy = node.get("legacy")?;

    // Long-form tweets carry the full text outside `legacy`.
    let text = str_at(node, "/note_tweet/note_tweet_results/result/text")
        .or_else(|| str_at(legacy, "/full_text"))
        .unwrap_or_default();

    let mut tweet = Tweet::new(id, text);
    tweet.created_at = str_at(legacy, "/created_at").and_then(parse_platform_timestamp);
    tweet.lang = str_at(legacy, "/lang").map(str::to_string);
    tweet.favorite_count = u64_at(legacy, "/favorite_count");
    tweet.retweet_count = u64_at(legacy, "/retweet_count");
    tweet.reply_count = u64_at(legacy, "/reply_count");
    tweet.quote_count = u64_at(legacy, "/quote_count");
    tweet.view_count = u64_at(node, "/views/count");
    tweet.author = node
        .pointer("/core/user_results/result")
        .and_then(parse_user)
        .map(|u| UserRef {
            id: u.id,
            screen_name: u.screen_name,
            name: u.name,
        });
    tweet.media = legacy
        .pointer("/extended_entities/media")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_media).collect())
        .unwrap_or_default();
    Some(tweet)
}

fn parse_media(node: &Value) -> Option<Media> {
    Some(Media {
        media_type: str_at(node, "/type")?.to_string(),
        url: str_at(node, "/media_url_https")?.to_string(),
        width: u64_at(node, "/original_info/width").map(|w| w as u32),
        height: u64_at(node, "/original_info/height").map(|h| h as u32),
    })
}

/// Parse a GraphQL `User` result object.
///
/// Newer responses move `screen_name`/`name`/`created_at` from `legacy` into
/// `core`; both placements are read.
pub fn parse_user(node: &Value) -> Option<User> {
    let id = str_at(node, "/rest_id")?;
    let legacy = node.get("legacy")?;
    let field = |name: &str| {
        str_at(node, &format!("/core/{name}")).or_else(|| str_at(legacy, &format!("/{name}")))
    };

    let mut user = User::new(id, field("screen_name")?);
    user.name = field("name").map(str::to_string);
    user.created_at = field("created_at").and_then(parse_platform_timestamp);
    user.description = str_at(legacy, "/description").map(str::to_string);
    user.location = str_at(node, "/location/location")
        .or_else(|| str_at(legacy, "/location"))
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    user.url = str_at(legacy, "/url").map(str::to_string);
    user.profile_image_url = str_at(node, "/avatar/image_url")
        .or_else(|| str_at(legacy, "/profile_image_url_https"))
        .map(str::to_string);
    user.followers_count = u64_at(legacy, "/followers_count");
    user.following_count = u64_at(legacy, "/friends_count");
    user.statuses_count = u64_at(legacy, "/statuses_count");
    user.verified = node
        .get("is_blue_verified")
        .and_then(Value::as_bool)
        .or_else(|| legacy.get("verified").and_then(Value::as_bool));
    user.protected = node
        .pointer("/privacy/protected")
        .and_then(Value::as_bool)
        .or_else(|| legacy.get("protected").and_then(Value::as_bool));
    Some(user)
}

/// Parse a REST 1.1 user object (friendships endpoints).
pub fn parse_rest_user(node: &Value) -> Result<User> {
    let id = str_at(node, "/id_str")
        .ok_or_else(|| PlatformError::Parse("user object without id_str".into()))?;
    let screen_name = str_at(node, "/screen_name")
        .ok_or_else(|| PlatformError::Parse("user object without screen_name".into()))?;

    let mut user = User::new(id, screen_name);
    user.name = str_at(node, "/name").map(str::to_string);
    user.description = str_at(node, "/description").map(str::to_string);
    user.location = str_at(node, "/location")
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    user.url = str_at(node, "/url").map(str::to_string);
    user.profile_image_url = str_at(node, "/profile_image_url_https").map(str::to_string);
    user.followers_count = u64_at(node, "/followers_count");
    user.following_count = u64_at(node, "/friends_count");
    user.statuses_count = u64_at(node, "/statuses_count");
    user.verified = node.get("verified").and_then(Value::as_bool);
    user.protected = node.get("protected").and_then(Value::as_bool);
    user.created_at = str_at(node, "/created_at").and_then(parse_platform_timestamp);
    Ok(user)
}

/// Parse the `event` envelope returned by the DM send endpoint.
pub fn parse_dm_event(body: &Value) -> Result<DirectMessage> {
    let event = body
        .get("event")
        .ok_or_else(|| PlatformError::Parse("direct message response without event".into()))?;
    let id = str_at(event, "/id")
        .ok_or_else(|| PlatformError::Parse("direct message event without id".into()))?;

    Ok(DirectMessage {
        id: id.to_string(),
        text: str_at(event, "/message_create/message_data/text")
            .unwrap_or_default()
            .to_string(),
        conversation_id: str_at(event, "/message_create/conversation_id").map(str::to_string),
        sender_id: str_at(event, "/message_create/sender_id").map(str::to_string),
        recipient_id: str_at(event, "/message_create/target/recipient_id").map(str::to_string),
        created_at: str_at(event, "/created_timestamp").and_then(parse_epoch_millis),
    })
}
