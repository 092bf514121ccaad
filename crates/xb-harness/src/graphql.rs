use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde_json::{json, Value};
use tracing::{debug, info};
use xb_core::config::{ConfigError, PlatformConfig};
use xb_core::types::{DirectMessage, Tweet, User};

use crate::platform::{
    MediaUpload, NewTweet, PlatformClient, PlatformError, Result, SearchProduct, TimelineKind,
};
use crate::response::{
    check_errors, collect_tweets, collect_users, first_error_message, parse_dm_event,
    parse_rest_user,
};
use crate::transport::{MultipartPart, OutboundRequest, RequestBody, Transport, TransportResponse};

/// Operation ids the web client ships with. `[platform.query_ids]` overrides
/// any of them when the platform rotates an id.
const DEFAULT_QUERY_IDS: &[(&str, &str)] = &[
    ("CreateTweet", "SiM_cAu83R0wnrpmKQQSEw"),
    ("DeleteTweet", "VaenaVgh5q5ih7kvyVjgtg"),
    ("FavoriteTweet", "lI07N6Otwv1PhnEgXILM7A"),
    ("UnfavoriteTweet", "ZYKSe-w7KEslx3JhSIk5LA"),
    ("CreateRetweet", "ojPdsZsimiJrUGLR1sjUtA"),
    ("DeleteRetweet", "iQtK4dl5hBmXewYZuEOKVw"),
    ("TweetDetail", "U0HTv-bAWTBYylwEMT7x5A"),
    ("TweetResultsByRestIds", "PTN9HhBAlpoCTHfspDgqLA"),
    ("UserTweets", "QWF3SzpHmykQHsQMixG0cg"),
    ("UserTweetsAndReplies", "vMkJyzx1wdmvOeeNG0n6Wg"),
    ("UserMedia", "2tLOJWwGuCTytDrGBg8VwQ"),
    ("Likes", "IohM3gxQHfvWePH5E3KuNA"),
    ("SearchTimeline", "flaR-PUMshxFWZWPNpq4zA"),
    ("Retweeters", "X-XEqG5qHQSAwmvy00xfyQ"),
    ("UserByScreenName", "NimuplG1OB7Fd2btCLdBOw"),
];

/// Upload chunk size for APPEND segments.
const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Upper bound on STATUS polls while the platform processes a video.
const MAX_STATUS_POLLS: u32 = 30;

fn features() -> Value {
    json!({
        "rweb_lists_timeline_redesign_enabled": true,
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": false,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "tweetypie_unmention_optimization_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "tweet_awards_web_tipping_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": false,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "responsive_web_enhance_cards_enabled": false
    })
}

/// [`PlatformClient`] over the web client's GraphQL and REST endpoints.
///
/// All traffic goes through the injected [`Transport`], which in production
/// is the header-injection middleware wrapping the network transport.
pub struct GraphqlClient {
    transport: Arc<dyn Transport>,
    base_url: Url,
    upload_url: Url,
    query_ids: BTreeMap<String, String>,
    language: String,
}

impl GraphqlClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &PlatformConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let parse = |name: &str, raw: &str| {
            Url::parse(raw).map_err(|e| ConfigError::Validation(format!("invalid {name} '{raw}': {e}")))
        };

        let mut query_ids: BTreeMap<String, String> = DEFAULT_QUERY_IDS
            .iter()
            .map(|(op, id)| (op.to_string(), id.to_string()))
            .collect();
        query_ids.extend(config.query_ids.clone());

        Ok(Self {
            transport,
            base_url: parse("platform.base_url", &config.base_url)?,
            upload_url: parse("platform.upload_url", &config.upload_url)?,
            query_ids,
            language: config.language.clone(),
        })
    }

    pub fn query_id(&self, operation: &str) -> Option<&str> {
        self.query_ids.get(operation).map(String::as_str)
    }

    fn join(base: &Url, path: &str) -> Result<Url> {
        base.join(path)
            .map_err(|e| PlatformError::Parse(format!("invalid endpoint '{path}': {e}")))
    }

    fn graphql_url(&self, operation: &str) -> Result<Url> {
        let id = self.query_id(operation).ok_or_else(|| {
            PlatformError::Api(format!("no query id configured for {operation}"))
        })?;
        Self::join(&self.base_url, &format!("/i/api/graphql/{id}/{operation}"))
    }

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    // -- raw calls --------------------------------------------------------

    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse> {
        let method = request.method.clone();
        let path = request.url.path().to_string();
        let resp = self.transport.send(request).await?;
        debug!(%method, %path, status = resp.status, "platform response");
        Ok(resp)
    }

    async fn gql_get(&self, operation: &str, variables: Value) -> Result<Value> {
        let mut url = self.graphql_url(operation)?;
        url.query_pairs_mut()
            .append_pair("variables", &variables.to_string())
            .append_pair("features", &features().to_string());
        let resp = self.send(OutboundRequest::get(url)).await?;
        decode(&resp)
    }

    async fn gql_post(&self, operation: &str, variables: Value) -> Result<Value> {
        let url = self.graphql_url(operation)?;
        let query_id = self.query_id(operation).unwrap_or_default().to_string();
        let body = json!({
            "variables": variables,
            "features": features(),
            "queryId": query_id,
        });
        let request = OutboundRequest::post(url)
            .with_headers(Self::json_headers())
            .with_body(RequestBody::Json(body));
        let resp = self.send(request).await?;
        decode(&resp)
    }

    async fn rest_form(&self, base: &Url, path: &str, fields: &[(&str, &str)]) -> Result<Value> {
        let url = Self::join(base, path)?;
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let request = OutboundRequest::post(url)
            .with_headers(headers)
            .with_body(RequestBody::Form(fields));
        let resp = self.send(request).await?;
        decode(&resp)
    }

    async fn friendship(&self, endpoint: &str, user_id: &str) -> Result<User> {
        let body = self
            .rest_form(
                &self.base_url,
                &format!("/i/api/1.1/friendships/{endpoint}.json"),
                &[
                    ("include_profile_interstitial_type", "1"),
                    ("include_blocking", "1"),
                    ("include_blocked_by", "1"),
                    ("include_followed_by", "1"),
                    ("include_want_retweets", "1"),
                    ("include_mute_edge", "1"),
                    ("include_can_dm", "1"),
                    ("include_can_media_tag", "1"),
                    ("skip_status", "1"),
                    ("user_id", user_id),
                ],
            )
            .await?;
        parse_rest_user(&body)
    }

    async fn tweet_mutation(&self, operation: &str, variables: Value) -> Result<()> {
        self.gql_post(operation, variables).await.map(|_| ())
    }

    // -- media ------------------------------------------------------------

    fn upload_endpoint(&self) -> Result<Url> {
        Self::join(&self.upload_url, "/i/media/upload.json")
    }

    async fn upload_status(&self, media_id: &str) -> Result<Value> {
        let mut url = self.upload_endpoint()?;
        url.query_pairs_mut()
            .append_pair("command", "STATUS")
            .append_pair("media_id", media_id);
        let resp = self.send(OutboundRequest::new(Method::GET, url)).await?;
        decode(&resp)
    }

    /// Poll STATUS until the platform finishes processing the upload.
    async fn await_processing(&self, media_id: &str, mut info: Value) -> Result<()> {
        for _ in 0..MAX_STATUS_POLLS {
            match info.get("state").and_then(Value::as_str) {
                Some("succeeded") | None => return Ok(()),
                Some("failed") => {
                    let reason = info
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("processing failed");
                    return Err(PlatformError::Media(reason.to_string()));
                }
                Some(state) => {
                    let wait = info
                        .get("check_after_secs")
                        .and_then(Value::as_u64)
                        .unwrap_or(1);
                    debug!(media_id, state, wait, "media still processing");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    let status = self.upload_status(media_id).await?;
                    info = status.get("processing_info").cloned().unwrap_or(Value::Null);
                }
            }
        }
        Err(PlatformError::Media(format!(
            "media {media_id} still processing after {MAX_STATUS_POLLS} checks"
        )))
    }
}

/// Status check, JSON parse and `errors` inspection for one response.
fn decode(resp: &TransportResponse) -> Result<Value> {
    let body: Option<Value> = if resp.body.is_empty() {
        None
    } else {
        resp.json().ok()
    };

    if !resp.is_success() {
        let message = body
            .as_ref()
            .and_then(first_error_message)
            .unwrap_or_else(|| {
                let text = resp.text();
                text.chars().take(200).collect()
            });
        return Err(PlatformError::Status {
            status: resp.status,
            message,
        });
    }

    let body = match body {
        Some(body) => body,
        None if resp.body.is_empty() => Value::Null,
        None => return Err(PlatformError::Parse("response body is not JSON".into())),
    };
    check_errors(&body)?;
    Ok(body)
}

fn media_category(media_type: &str) -> &'static str {
    match media_type {
        "image/gif" => "tweet_gif",
        t if t.starts_with("video/") => "tweet_video",
        _ => "tweet_image",
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string())
}

#[async_trait]
impl PlatformClient for GraphqlClient {
    async fn create_tweet(&self, tweet: NewTweet) -> Result<Tweet> {
        let media_entities: Vec<Value> = tweet
            .media_ids
            .iter()
            .map(|id| json!({ "media_id": id, "tagged_users": [] }))
            .collect();
        let mut variables = json!({
            "tweet_text": tweet.text,
            "dark_request": false,
            "media": { "media_entities": media_entities, "possibly_sensitive": false },
            "semantic_annotation_ids": [],
        });
        if let Some(reply_to) = &tweet.reply_to {
            variables["reply"] = json!({
                "in_reply_to_tweet_id": reply_to,
                "exclude_reply_user_ids": [],
            });
        }

        let body = self.gql_post("CreateTweet", variables).await?;
        let created = collect_tweets(&body)
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::Parse("created tweet missing from response".into()))?;
        info!(tweet_id = %created.id, reply = tweet.reply_to.is_some(), "tweet created");
        Ok(created)
    }

    async fn delete_tweet(&self, tweet_id: &str) -> Result<()> {
        self.tweet_mutation(
            "DeleteTweet",
            json!({ "tweet_id": tweet_id, "dark_request": false }),
        )
        .await
    }

    async fn favorite_tweet(&self, tweet_id: &str) -> Result<()> {
        self.tweet_mutation("FavoriteTweet", json!({ "tweet_id": tweet_id }))
            .await
    }

    async fn unfavorite_tweet(&self, tweet_id: &str) -> Result<()> {
        self.tweet_mutation("UnfavoriteTweet", json!({ "tweet_id": tweet_id }))
            .await
    }

    async fn retweet(&self, tweet_id: &str) -> Result<()> {
        self.tweet_mutation(
            "CreateRetweet",
            json!({ "tweet_id": tweet_id, "dark_request": false }),
        )
        .await
    }

    async fn delete_retweet(&self, tweet_id: &str) -> Result<()> {
        self.tweet_mutation(
            "DeleteRetweet",
            json!({ "source_tweet_id": tweet_id, "dark_request": false }),
        )
        .await
    }

    async fn get_tweet_by_id(&self, tweet_id: &str) -> Result<Tweet> {
        let body = self
            .gql_get(
                "TweetDetail",
                json!({
                    "focalTweetId": tweet_id,
                    "with_rux_injections": false,
                    "includePromotedContent": false,
                    "withCommunity": true,
                    "withQuickPromoteEligibilityTweetFields": true,
                    "withBirdwatchNotes": true,
                    "withVoice": true,
                    "withV2Timeline": true,
                }),
            )
            .await?;
        // The conversation also carries ancestors and replies.
        collect_tweets(&body)
            .into_iter()
            .find(|t| t.id == tweet_id)
            .ok_or_else(|| PlatformError::NotFound(format!("tweet {tweet_id}")))
    }

    async fn get_tweets_by_ids(&self, tweet_ids: &[String]) -> Result<Vec<Tweet>> {
        if tweet_ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = self
            .gql_get(
                "TweetResultsByRestIds",
                json!({
                    "tweetIds": tweet_ids,
                    "withCommunity": false,
                    "includePromotedContent": false,
                    "withVoice": false,
                }),
            )
            .await?;
        let mut found: BTreeMap<String, Tweet> = collect_tweets(&body)
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        Ok(tweet_ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn get_user_tweets(
        &self,
        user_id: &str,
        kind: TimelineKind,
        count: u32,
    ) -> Result<Vec<Tweet>> {
        let operation = match kind {
            TimelineKind::Tweets => "UserTweets",
            TimelineKind::Replies => "UserTweetsAndReplies",
            TimelineKind::Media => "UserMedia",
            TimelineKind::Likes => "Likes",
        };
        let body = self
            .gql_get(
                operation,
                json!({
                    "userId": user_id,
                    "count": count,
                    "includePromotedContent": false,
                    "withQuickPromoteEligibilityTweetFields": true,
                    "withVoice": true,
                    "withV2Timeline": true,
                }),
            )
            .await?;
        let mut tweets = collect_tweets(&body);
        tweets.truncate(count as usize);
        debug!(user_id, %kind, returned = tweets.len(), "timeline fetched");
        Ok(tweets)
    }

    async fn search_tweets(
        &self,
        query: &str,
        product: SearchProduct,
        count: u32,
    ) -> Result<Vec<Tweet>> {
        let body = self
            .gql_get(
                "SearchTimeline",
                json!({
                    "rawQuery": query,
                    "count": count,
                    "querySource": "typed_query",
                    "product": product.to_string(),
                }),
            )
            .await?;
        let mut tweets = collect_tweets(&body);
        tweets.truncate(count as usize);
        Ok(tweets)
    }

    async fn get_retweeters(&self, tweet_id: &str, count: u32) -> Result<Vec<User>> {
        let body = self
            .gql_get(
                "Retweeters",
                json!({
                    "tweetId": tweet_id,
                    "count": count,
                    "includePromotedContent": false,
                }),
            )
            .await?;
        let mut users = collect_users(&body);
        users.truncate(count as usize);
        Ok(users)
    }

    async fn get_user_by_screen_name(&self, screen_name: &str) -> Result<User> {
        let body = self
            .gql_get(
                "UserByScreenName",
                json!({
                    "screen_name": screen_name,
                    "withSafetyModeUserFields": true,
                }),
            )
            .await?;
        collect_users(&body)
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::NotFound(format!("user @{screen_name}")))
    }

    async fn follow_user(&self, user_id: &str) -> Result<User> {
        self.friendship("create", user_id).await
    }

    async fn unfollow_user(&self, user_id: &str) -> Result<User> {
        self.friendship("destroy", user_id).await
    }

    async fn upload_media(&self, upload: MediaUpload) -> Result<String> {
        let data = tokio::fs::read(&upload.path).await.map_err(|e| {
            PlatformError::Media(format!("cannot read {}: {e}", upload.path.display()))
        })?;
        if data.is_empty() {
            return Err(PlatformError::Media(format!(
                "{} is empty",
                upload.path.display()
            )));
        }
        let total_bytes = data.len().to_string();
        let category = media_category(&upload.media_type);

        let init = self
            .rest_form(
                &self.upload_url,
                "/i/media/upload.json",
                &[
                    ("command", "INIT"),
                    ("total_bytes", total_bytes.as_str()),
                    ("media_type", upload.media_type.as_str()),
                    ("media_category", category),
                ],
            )
            .await?;
        let media_id = init
            .get("media_id_string")
            .and_then(Value::as_str)
            .ok_or_else(|| PlatformError::Media("INIT response without media_id_string".into()))?
            .to_string();

        let name = file_name(&upload.path);
        for (index, chunk) in data.chunks(CHUNK_SIZE).enumerate() {
            let parts = vec![
                MultipartPart::text("command", "APPEND"),
                MultipartPart::text("media_id", media_id.clone()),
                MultipartPart::text("segment_index", index.to_string()),
                MultipartPart::file("media", name.clone(), chunk.to_vec()),
            ];
            let request = OutboundRequest::post(self.upload_endpoint()?)
                .with_body(RequestBody::Multipart(parts));
            let resp = self.send(request).await?;
            decode(&resp)?;
        }

        let finalize = self
            .rest_form(
                &self.upload_url,
                "/i/media/upload.json",
                &[("command", "FINALIZE"), ("media_id", media_id.as_str())],
            )
            .await?;
        if let Some(processing) = finalize.get("processing_info") {
            self.await_processing(&media_id, processing.clone()).await?;
        }

        info!(%media_id, bytes = data.len(), media_type = %upload.media_type, "media uploaded");
        Ok(media_id)
    }

    async fn create_media_metadata(&self, media_id: &str, alt_text: &str) -> Result<()> {
        let url = Self::join(&self.base_url, "/i/api/1.1/media/metadata/create.json")?;
        let body = json!({ "media_id": media_id, "alt_text": { "text": alt_text } });
        let request = OutboundRequest::post(url)
            .with_headers(Self::json_headers())
            .with_body(RequestBody::Json(body));
        let resp = self.send(request).await?;
        decode(&resp).map(|_| ())
    }

    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<DirectMessage> {
        let url = Self::join(&self.base_url, "/i/api/1.1/direct_messages/events/new.json")?;
        let body = json!({
            "event": {
                "type": "message_create",
                "message_create": {
                    "target": { "recipient_id": user_id },
                    "message_data": { "text": text },
                }
            }
        });
        let mut headers = Self::json_headers();
        if let Ok(lang) = HeaderValue::from_str(&self.language) {
            headers.insert("x-twitter-client-language", lang);
        }
        let request = OutboundRequest::post(url)
            .with_headers(headers)
            .with_body(RequestBody::Json(body));
        let resp = self.send(request).await?;
        parse_dm_event(&decode(&resp)?)
    }
}
