//! The fixed action table served over the bridge.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::info;
use xb_core::types::{Tweet, User};
use xb_harness::platform::{MediaUpload, NewTweet, TimelineKind};

use crate::action_registry::{
    ActionArgs, ActionContext, ActionDescriptor, ActionFuture, ActionRegistry, FnActionHandler,
};
use crate::error::{ActionError, Result};

/// Build the registry with every built-in action, `listActions` included.
pub fn builtin_actions() -> ActionRegistry {
    let mut registry = ActionRegistry::new();

    macro_rules! action {
        ($name:literal, [$($req:literal),*], $mutating:expr, $desc:literal, $handler:ident) => {
            registry.register(
                ActionDescriptor::new($name, &[$($req),*], $mutating, $desc),
                Arc::new(FnActionHandler::new(|ctx, args| -> ActionFuture {
                    Box::pin($handler(ctx, args))
                })),
            );
        };
    }

    action!("postTweet", ["text"], true, "Publish a tweet", post_tweet);
    action!(
        "postTweetWithMedia",
        ["text", "mediaPath", "mediaType"],
        true,
        "Upload a media file and publish a tweet carrying it",
        post_tweet_with_media
    );
    action!("replyToTweet", ["tweetId", "text"], true, "Reply to a tweet", reply_to_tweet);
    action!("deleteTweet", ["tweetId"], true, "Delete one of your tweets", delete_tweet);
    action!("likeTweet", ["tweetId"], true, "Like a tweet", like_tweet);
    action!("unlikeTweet", ["tweetId"], true, "Remove a like", unlike_tweet);
    action!("retweet", ["tweetId"], true, "Retweet a tweet", retweet);
    action!("undoRetweet", ["tweetId"], true, "Remove a retweet", undo_retweet);
    action!("getTweetById", ["tweetId"], false, "Fetch one tweet", get_tweet_by_id);
    action!("getTweetsByIds", ["tweetIds"], false, "Fetch several tweets", get_tweets_by_ids);
    action!("getUserTimeline", ["userId"], false, "Recent tweets of a user", get_user_timeline);
    action!("getUserMedia", ["userId"], false, "Recent media tweets of a user", get_user_media);
    action!("getLikedTweets", ["userId"], false, "Tweets a user liked", get_liked_tweets);
    action!("searchTweets", ["query"], false, "Search tweets", search_tweets);
    action!("getRetweets", ["tweetId"], false, "Users who retweeted a tweet", get_retweets);
    action!("getUserInfo", ["username"], false, "Profile of a user", get_user_info);
    action!("followUser", ["username"], true, "Follow a user", follow_user);
    action!("unfollowUser", ["username"], true, "Unfollow a user", unfollow_user);
    action!(
        "sendDirectMessage",
        ["userId", "text"],
        true,
        "Send a direct message",
        send_direct_message
    );
    action!(
        "get_transaction_id",
        ["url", "method"],
        false,
        "Generate a transaction token for a method and URL",
        get_transaction_id
    );

    let list_descriptor = ActionDescriptor::new(
        "listActions",
        &[],
        false,
        "Describe every available action",
    );
    let mut listing: Vec<ActionDescriptor> = registry.list().into_iter().cloned().collect();
    listing.push(list_descriptor.clone());
    listing.sort_by(|a, b| a.name.cmp(&b.name));
    let listing = Arc::new(listing);
    registry.register(
        list_descriptor,
        Arc::new(FnActionHandler::new(move |_ctx, _args| -> ActionFuture {
            let listing = listing.clone();
            Box::pin(async move {
                serde_json::to_value(&*listing)
                    .map_err(|e| ActionError::Upstream(format!("cannot describe actions: {e}")))
            })
        })),
    );

    registry
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

fn put<T: Into<Value>>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        map.insert(key.to_string(), v.into());
    }
}

/// Tweet as returned by `getTweetById`. Absent fields are omitted.
pub fn project_tweet(tweet: &Tweet) -> Value {
    let mut out = Map::new();
    out.insert("tweetId".into(), tweet.id.clone().into());
    out.insert("text".into(), tweet.text.clone().into());
    put(&mut out, "createdAt", tweet.created_at.map(|t| t.to_rfc3339()));
    if let Some(author) = &tweet.author {
        out.insert("authorId".into(), author.id.clone().into());
        out.insert("authorUsername".into(), author.screen_name.clone().into());
        put(&mut out, "authorName", author.name.clone());
    }
    put(&mut out, "lang", tweet.lang.clone());
    put(&mut out, "likeCount", tweet.favorite_count);
    put(&mut out, "retweetCount", tweet.retweet_count);
    put(&mut out, "replyCount", tweet.reply_count);
    put(&mut out, "quoteCount", tweet.quote_count);
    put(&mut out, "viewCount", tweet.view_count);
    if !tweet.media.is_empty() {
        let media: Vec<Value> = tweet
            .media
            .iter()
            .map(|m| json!({ "type": m.media_type, "url": m.url }))
            .collect();
        out.insert("media".into(), Value::Array(media));
    }
    Value::Object(out)
}

/// User as returned by `getUserInfo`. Absent fields are omitted.
pub fn project_user(user: &User) -> Value {
    let mut out = Map::new();
    out.insert("userId".into(), user.id.clone().into());
    out.insert("username".into(), user.screen_name.clone().into());
    put(&mut out, "name", user.name.clone());
    put(&mut out, "description", user.description.clone());
    put(&mut out, "location", user.location.clone());
    put(&mut out, "url", user.url.clone());
    put(&mut out, "profileImageUrl", user.profile_image_url.clone());
    put(&mut out, "followersCount", user.followers_count);
    put(&mut out, "followingCount", user.following_count);
    put(&mut out, "tweetCount", user.statuses_count);
    put(&mut out, "verified", user.verified);
    put(&mut out, "protected", user.protected);
    put(&mut out, "createdAt", user.created_at.map(|t| t.to_rfc3339()));
    Value::Object(out)
}

fn tweet_ids(tweets: &[Tweet]) -> Value {
    Value::Array(tweets.iter().map(|t| Value::String(t.id.clone())).collect())
}

/// Usernames arrive with or without the leading `@`.
fn username(args: &ActionArgs) -> Result<String> {
    let raw = args.string("username")?;
    let name = raw.trim_start_matches('@');
    if name.is_empty() {
        return Err(ActionError::invalid("username", "must not be empty"));
    }
    Ok(name.to_string())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn post_tweet(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let text = args.text("text")?;
    let tweet = ctx.client.create_tweet(NewTweet::text(text)).await?;
    Ok(json!({ "tweetId": tweet.id }))
}

async fn post_tweet_with_media(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let text = args.text("text")?;
    let path = PathBuf::from(args.string("mediaPath")?);
    let media_type = args.string("mediaType")?;
    let alt_text = args.opt_string("altText")?;

    let media_id = ctx
        .client
        .upload_media(MediaUpload { path, media_type })
        .await?;
    if let Some(alt) = alt_text {
        ctx.client.create_media_metadata(&media_id, &alt).await?;
    }
    let tweet = ctx
        .client
        .create_tweet(NewTweet::text(text).with_media(media_id.clone()))
        .await?;
    Ok(json!({ "tweetId": tweet.id, "mediaId": media_id }))
}

async fn reply_to_tweet(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let parent = args.id("tweetId")?;
    let text = args.text("text")?;
    let tweet = ctx
        .client
        .create_tweet(NewTweet::text(text).reply_to(parent))
        .await?;
    Ok(json!({ "tweetId": tweet.id }))
}

async fn delete_tweet(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let id = args.id("tweetId")?;
    ctx.client.delete_tweet(&id).await?;
    Ok(json!({ "tweetId": id, "deleted": true }))
}

async fn like_tweet(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let id = args.id("tweetId")?;
    ctx.client.favorite_tweet(&id).await?;
    Ok(json!({ "tweetId": id, "liked": true }))
}

async fn unlike_tweet(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let id = args.id("tweetId")?;
    ctx.client.unfavorite_tweet(&id).await?;
    Ok(json!({ "tweetId": id, "liked": false }))
}

async fn retweet(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let id = args.id("tweetId")?;
    ctx.client.retweet(&id).await?;
    Ok(json!({ "tweetId": id, "retweeted": true }))
}

async fn undo_retweet(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let id = args.id("tweetId")?;
    ctx.client.delete_retweet(&id).await?;
    Ok(json!({ "tweetId": id, "retweeted": false }))
}

async fn get_tweet_by_id(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let id = args.id("tweetId")?;
    let tweet = ctx.client.get_tweet_by_id(&id).await?;
    Ok(project_tweet(&tweet))
}

async fn get_tweets_by_ids(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let ids = args.id_list("tweetIds")?;
    let tweets = ctx.client.get_tweets_by_ids(&ids).await?;
    Ok(tweet_ids(&tweets))
}

async fn get_user_timeline(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let user_id = args.id("userId")?;
    let tweets = ctx
        .client
        .get_user_tweets(&user_id, args.timeline_kind()?, args.max_results())
        .await?;
    Ok(tweet_ids(&tweets))
}

async fn get_user_media(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let user_id = args.id("userId")?;
    let tweets = ctx
        .client
        .get_user_tweets(&user_id, TimelineKind::Media, args.max_results())
        .await?;
    Ok(tweet_ids(&tweets))
}

async fn get_liked_tweets(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let user_id = args.id("userId")?;
    let tweets = ctx
        .client
        .get_user_tweets(&user_id, TimelineKind::Likes, args.max_results())
        .await?;
    Ok(tweet_ids(&tweets))
}

async fn search_tweets(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let query = args.string("query")?;
    let mode = args.search_mode()?;
    let tweets = ctx
        .client
        .search_tweets(&query, mode, args.max_results())
        .await?;
    Ok(tweet_ids(&tweets))
}

async fn get_retweets(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let id = args.id("tweetId")?;
    let users = ctx.client.get_retweeters(&id, args.max_results()).await?;
    Ok(Value::Array(
        users.into_iter().map(|u| Value::String(u.id)).collect(),
    ))
}

async fn get_user_info(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let name = username(&args)?;
    let user = ctx.client.get_user_by_screen_name(&name).await?;
    Ok(project_user(&user))
}

async fn follow_user(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let name = username(&args)?;
    let user = ctx.client.get_user_by_screen_name(&name).await?;
    let followed = ctx.client.follow_user(&user.id).await?;
    info!(user_id = %followed.id, "followed user");
    Ok(json!({ "userId": followed.id }))
}

async fn unfollow_user(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let name = username(&args)?;
    let user = ctx.client.get_user_by_screen_name(&name).await?;
    let unfollowed = ctx.client.unfollow_user(&user.id).await?;
    info!(user_id = %unfollowed.id, "unfollowed user");
    Ok(json!({ "userId": unfollowed.id }))
}

async fn send_direct_message(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let user_id = args.id("userId")?;
    let text = args.text("text")?;
    let message = ctx.client.send_direct_message(&user_id, &text).await?;
    Ok(json!({ "messageId": message.id }))
}

async fn get_transaction_id(ctx: ActionContext, args: ActionArgs) -> Result<Value> {
    let url = args.string("url")?;
    let method = args.string("method")?;
    let token = ctx.signing.token_for(&method, &url).await?;
    Ok(Value::String(token))
}
