//! Payload shapes of the mobile API and their conversion into `PostRecord`s.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use scraper::{Html, Selector};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::models::{AccountId, PostKind, PostRecord};

const LOCATION_ICON: &str = "timeline_card_small_location_default.png";
const PINNED_TITLE: &str = "置顶";
const ZERO_WIDTH_SPACE: char = '\u{200b}';

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    Json(String),

    #[error("Unrecognized date: {0:?}")]
    Date(String),

    #[error("Unrecognized count: {0}")]
    Count(String),

    #[error("Detail page carries no status")]
    MissingStatus,
}

/// Envelope of every `container/getIndex` answer. `ok` is 1 on success.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub ok: i64,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn into_data(self) -> Option<T> {
        if self.ok == 1 { self.data } else { None }
    }
}

#[derive(Debug, Deserialize)]
pub struct UserInfoData {
    #[serde(rename = "userInfo")]
    pub user_info: RawUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub screen_name: String,
    #[serde(default)]
    pub statuses_count: Value,
}

#[derive(Debug, Deserialize)]
pub struct CardsData {
    #[serde(default)]
    pub cards: Vec<RawCard>,
}

#[derive(Debug, Deserialize)]
pub struct RawCard {
    #[serde(default)]
    pub card_type: i64,
    pub mblog: Option<RawPost>,
}

impl RawCard {
    /// Only type-9 cards hold posts.
    pub fn into_post(self) -> Option<RawPost> {
        if self.card_type == 9 { self.mblog } else { None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTitle {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPost {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub attitudes_count: Value,
    #[serde(default)]
    pub comments_count: Value,
    #[serde(default)]
    pub reposts_count: Value,
    #[serde(default, rename = "isLongText")]
    pub is_long_text: bool,
    pub user: Option<RawUser>,
    pub retweeted_status: Option<Box<RawPost>>,
    pub title: Option<RawTitle>,
}

#[derive(Debug, Deserialize)]
struct DetailEnvelope {
    status: Option<RawPost>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("expected id, got {}", other))),
    }
}

/// Counts arrive as integers or as display strings such as `"3万"` or `"1.2万+"`.
pub fn parse_count(raw: &Value) -> Result<u64, ParseError> {
    match raw {
        Value::Null => Ok(0),
        Value::Number(n) => n.as_u64().ok_or_else(|| ParseError::Count(n.to_string())),
        Value::String(s) => parse_count_str(s),
        other => Err(ParseError::Count(other.to_string())),
    }
}

fn parse_count_str(raw: &str) -> Result<u64, ParseError> {
    let trimmed = raw.trim().trim_end_matches('+');
    if trimmed.is_empty() {
        return Ok(0);
    }
    let (number, scale) = match trimmed.strip_suffix('万') {
        Some(number) => (number, 10_000.0),
        None => match trimmed.strip_suffix('亿') {
            Some(number) => (number, 100_000_000.0),
            None => (trimmed, 1.0),
        },
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| ParseError::Count(raw.to_string()))?;
    Ok((value * scale).round() as u64)
}

/// Normalizes the platform's display dates to calendar dates relative to `now`.
pub fn standardize_date(raw: &str, now: NaiveDateTime) -> Result<NaiveDate, ParseError> {
    let raw = raw.trim();
    let today = now.date();

    if raw.contains("刚刚") || raw.eq_ignore_ascii_case("just now") {
        return Ok(today);
    }
    let ago = |delta: Option<Duration>| {
        delta
            .and_then(|delta| now.checked_sub_signed(delta))
            .map(|then| then.date())
            .ok_or_else(|| ParseError::Date(raw.to_string()))
    };

    if let Some(minutes) = leading_number(raw, &["分钟", " minute"]) {
        return ago(Duration::try_minutes(minutes));
    }
    if let Some(hours) = leading_number(raw, &["小时", " hour"]) {
        return ago(Duration::try_hours(hours));
    }
    if raw.contains("昨天") || raw.to_ascii_lowercase().starts_with("yesterday") {
        return ago(Duration::try_days(1));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %z %Y") {
        return Ok(timestamp.date_naive());
    }
    if raw.matches('-').count() == 1 {
        let with_year = format!("{}-{}", today.year(), raw);
        return NaiveDate::parse_from_str(&with_year, "%Y-%m-%d")
            .map_err(|_| ParseError::Date(raw.to_string()));
    }
    Err(ParseError::Date(raw.to_string()))
}

/// `"5分钟前"` or `"5 minutes ago"` with marker `"分钟"`/`" minute"` yields 5.
fn leading_number(raw: &str, markers: &[&str]) -> Option<i64> {
    markers.iter().find_map(|marker| {
        let end = raw.find(marker)?;
        raw[..end].trim().parse().ok()
    })
}

pub fn is_pinned(post: &RawPost) -> bool {
    post.title
        .as_ref()
        .is_some_and(|title| title.text == PINNED_TITLE)
}

/// Plain text and annotations pulled out of a post's HTML body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextFeatures {
    pub text: String,
    pub location: Option<String>,
    pub topics: Vec<String>,
    pub mentions: Vec<String>,
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

pub fn extract_text_features(body: &str) -> TextFeatures {
    let fragment = Html::parse_fragment(body);
    let clean = |s: String| s.replace(ZERO_WIDTH_SPACE, "").trim().to_string();

    let text = clean(fragment.root_element().text().collect());

    let location = selector("span").and_then(|spans| {
        let img = selector("img")?;
        let spans: Vec<_> = fragment.select(&spans).collect();
        let icon_at = spans.iter().position(|span| {
            span.select(&img)
                .any(|i| i.value().attr("src").is_some_and(|src| src.contains(LOCATION_ICON)))
        })?;
        spans
            .get(icon_at + 1)
            .map(|next| clean(next.text().collect()))
            .filter(|loc| !loc.is_empty())
    });

    let topics = selector("span.surl-text")
        .map(|topic| {
            fragment
                .select(&topic)
                .map(|span| span.text().collect::<String>())
                .filter(|t| t.chars().count() > 2 && t.starts_with('#') && t.ends_with('#'))
                .map(|t| t.trim_matches('#').to_string())
                .collect()
        })
        .unwrap_or_default();

    let mentions = selector("a[href]")
        .map(|anchor| {
            fragment
                .select(&anchor)
                .filter_map(|a| {
                    let label = a.text().collect::<String>();
                    let name = label.strip_prefix('@')?;
                    let href = a.value().attr("href")?;
                    (!name.is_empty() && href.ends_with(name)).then(|| name.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    TextFeatures {
        text,
        location,
        topics,
        mentions,
    }
}

/// Converts one API post, including any embedded retweet, into a record.
pub fn parse_post(raw: &RawPost, now: NaiveDateTime) -> Result<PostRecord, ParseError> {
    let features = extract_text_features(&raw.text);
    let kind = match &raw.retweeted_status {
        Some(original) => PostKind::Retweet {
            original: parse_post(original, now).ok().map(Box::new),
        },
        None => PostKind::Original,
    };

    Ok(PostRecord {
        id: raw.id.clone(),
        author_id: raw.user.as_ref().and_then(|u| AccountId::parse(&u.id)),
        author_name: raw
            .user
            .as_ref()
            .map(|u| u.screen_name.clone())
            .filter(|name| !name.is_empty()),
        text: features.text,
        created_at: standardize_date(&raw.created_at, now)?,
        source: raw.source.clone().filter(|s| !s.is_empty()),
        location: features.location,
        likes: parse_count(&raw.attitudes_count)?,
        comments: parse_count(&raw.comments_count)?,
        reposts: parse_count(&raw.reposts_count)?,
        topics: features.topics,
        mentions: features.mentions,
        pinned: is_pinned(raw),
        truncated: raw.is_long_text,
        kind,
    })
}

/// The detail page embeds the full post as a `"status": {...}` object inside a script.
pub fn parse_detail_page(html: &str) -> Result<RawPost, ParseError> {
    let start = html.find("\"status\":").ok_or(ParseError::MissingStatus)?;
    let tail = &html[start..];
    let end = tail.rfind("\"hotScheme\"").ok_or(ParseError::MissingStatus)?;
    let body = &tail[..end];
    let body = body[..body.rfind(',').ok_or(ParseError::MissingStatus)?].trim_end();

    let envelope: DetailEnvelope = serde_json::from_str(&format!("{{{}}}", body))
        .map_err(|e| ParseError::Json(e.to_string()))?;
    envelope.status.ok_or(ParseError::MissingStatus)
}
