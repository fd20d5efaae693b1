use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};

use super::parse::{
    ApiResponse, CardsData, ParseError, RawCard, UserInfoData, parse_count, parse_detail_page,
    parse_post,
};
use crate::collaborators::{PostSource, SourceError};
use crate::models::{AccountId, AccountMeta, PostRecord, PostsPage};
use crate::network::{FetchError, HttpClient};

pub const MOBILE_BASE: &str = "https://m.weibo.cn";
const PROFILE_CONTAINER: &str = "100505";
const TIMELINE_CONTAINER: &str = "107603";

/// Timeline source backed by the public mobile JSON API.
pub struct MobileApiSource {
    http: HttpClient,
    base_url: String,
}

impl MobileApiSource {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: MOBILE_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn container_url(&self, container: &str, id: &AccountId, page: Option<u64>) -> String {
        let mut url = format!(
            "{}/api/container/getIndex?containerid={}{}",
            self.base_url, container, id
        );
        if let Some(page) = page {
            url.push_str(&format!("&page={}", page));
        }
        url
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// 404 means the account is gone; throttling statuses are reported as such.
pub fn source_error(error: FetchError, id: Option<&AccountId>) -> SourceError {
    match (&error, id) {
        (FetchError::HttpStatus(404), Some(id)) => SourceError::NotFound(id.clone()),
        _ if error.is_rate_limited() => SourceError::RateLimited,
        (FetchError::Decode(msg), _) => SourceError::Malformed(msg.clone()),
        _ => SourceError::Network(error.to_string()),
    }
}

fn malformed(error: ParseError) -> SourceError {
    SourceError::Malformed(error.to_string())
}

#[async_trait]
impl PostSource for MobileApiSource {
    async fn fetch_account_meta(&self, id: &AccountId) -> Result<AccountMeta, SourceError> {
        let url = self.container_url(PROFILE_CONTAINER, id, None);
        let response: ApiResponse<UserInfoData> = self
            .http
            .fetch_json(&url)
            .await
            .map_err(|e| source_error(e, Some(id)))?;

        let user = response
            .into_data()
            .ok_or_else(|| SourceError::NotFound(id.clone()))?
            .user_info;

        Ok(AccountMeta {
            display_name: user.screen_name,
            total_post_count: parse_count(&user.statuses_count).map_err(malformed)?,
        })
    }

    async fn fetch_posts_page(&self, id: &AccountId, page: u64) -> Result<PostsPage, SourceError> {
        let url = self.container_url(TIMELINE_CONTAINER, id, Some(page));
        let response: ApiResponse<CardsData> = self
            .http
            .fetch_json(&url)
            .await
            .map_err(|e| source_error(e, Some(id)))?;

        // The API answers ok=0 past the last page.
        let Some(data) = response.into_data() else {
            return Ok(PostsPage {
                posts: Vec::new(),
                end_of_data: true,
            });
        };

        let now = now();
        let end_of_data = data.cards.is_empty();
        let mut posts = Vec::with_capacity(data.cards.len());
        for raw in data.cards.into_iter().filter_map(RawCard::into_post) {
            match parse_post(&raw, now) {
                Ok(post) => posts.push(post),
                Err(e) => tracing::warn!(account = %id, page, post = %raw.id, error = %e, "Skipping unparseable post"),
            }
        }

        Ok(PostsPage { posts, end_of_data })
    }

    async fn fetch_full_post(&self, post_id: &str) -> Result<Option<PostRecord>, SourceError> {
        let url = format!("{}/detail/{}", self.base_url, post_id);
        let page = self
            .http
            .fetch(&url)
            .await
            .map_err(|e| source_error(e, None))?;

        match parse_detail_page(&page.content) {
            Ok(raw) => Ok(Some(parse_post(&raw, now()).map_err(malformed)?)),
            Err(e) => {
                tracing::debug!(post = post_id, error = %e, "Full post unavailable, keeping page version");
                Ok(None)
            }
        }
    }
}
