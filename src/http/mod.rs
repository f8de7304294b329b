//! The rate-limited REST request client.

pub mod error;
mod routing;

pub use error::{ApiError, Error};
pub use routing::Route;

use crate::{
    constants::{API_URL, USER_AGENT},
    id::{EmojiId, UserId},
    model::{Emoji, Message, User},
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use dashmap::DashMap;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT as USER_AGENT_HEADER},
    multipart::{Form, Part},
    Client,
    Method,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument};

/// A file to be sent as one multipart form part.
#[derive(Clone, Debug)]
pub struct AttachmentFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Per-route reservations produced by server-signalled throttling.
///
/// A 429 on one route parks only that route; unrelated routes proceed
/// unhindered.
#[derive(Default)]
struct RateLimiter {
    buckets: DashMap<String, Instant>,
}

impl RateLimiter {
    /// Waits out any active reservation on `bucket`.
    async fn acquire(&self, bucket: &str) {
        let until = self.buckets.get(bucket).map(|entry| *entry);

        if let Some(until) = until {
            let now = Instant::now();
            if until > now {
                sleep(until - now).await;
            }
            self.buckets
                .remove_if(bucket, |_, value| *value <= Instant::now());
        }
    }

    /// Parks `bucket` for `wait`, keeping a longer existing reservation.
    fn reserve(&self, bucket: &str, wait: Duration) {
        let until = Instant::now() + wait;
        let mut entry = self.buckets.entry(bucket.to_owned()).or_insert(until);
        if *entry < until {
            *entry = until;
        }
    }
}

/// Sends HTTP requests identified by [`Route`], retrying on server-signalled
/// throttling and classifying responses.
pub struct Http {
    client: Client,
    token: String,
    base_url: String,
    limiter: RateLimiter,
}

impl Http {
    /// Creates a client around a bot token.
    ///
    /// The scheme prefix is added if absent.
    pub fn new(token: &str) -> Self {
        let token = if token.starts_with("Bot ") {
            token.to_owned()
        } else {
            format!("Bot {token}")
        };

        Self {
            client: Client::new(),
            token,
            base_url: API_URL.to_owned(),
            limiter: RateLimiter::default(),
        }
    }

    /// Overrides the REST base URL, e.g. for a local proxy.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(auth) = HeaderValue::from_str(&self.token) {
            headers.insert(AUTHORIZATION, auth);
        }
        headers.insert(USER_AGENT_HEADER, HeaderValue::from_static(USER_AGENT));
        headers
    }

    /// Issues a request, absorbing throttling and classifying the response.
    ///
    /// A 429 reserves this route's bucket for the server-supplied
    /// `retry_after` and re-issues the identical request, without a retry cap
    /// or backoff growth.
    #[instrument(skip(self, body, files))]
    pub async fn request(
        &self,
        route: Route,
        body: Option<Value>,
        files: &[AttachmentFile],
    ) -> error::Result<Value> {
        let bucket = route.bucket();
        let url = format!("{}{}", self.base_url, route.path);

        loop {
            self.limiter.acquire(&bucket).await;

            let mut request = self
                .client
                .request(route.method.clone(), &url)
                .headers(self.headers());

            if files.is_empty() {
                if let Some(body) = &body {
                    request = request.json(body);
                }
            } else {
                // Multipart bodies are rebuilt per attempt; a Form cannot be
                // reused once sent.
                let mut form = Form::new().text(
                    "payload_json",
                    serde_json::to_string(body.as_ref().unwrap_or(&Value::Null))?,
                );

                for (index, file) in files.iter().enumerate() {
                    let part = Part::bytes(file.data.clone())
                        .file_name(file.filename.clone())
                        .mime_str("application/octet-stream")
                        .map_err(Error::Request)?;
                    form = form.part(format!("file[{index}]"), part);
                }

                request = request.multipart(form);
            }

            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            let data: Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                // Some endpoints (204s, proxies) answer with bare text.
                Err(_) => Value::String(text),
            };

            if status.is_success() {
                return Ok(data);
            }

            match status.as_u16() {
                400 | 401 | 403 | 404 | 405 => {
                    let message = data
                        .get("message")
                        .and_then(Value::as_str)
                        .map_or_else(|| data.to_string(), ToOwned::to_owned);

                    return Err(Error::Api(ApiError {
                        status: status.as_u16(),
                        message,
                        raw: data,
                    }));
                },
                429 => {
                    let retry_after = data
                        .get("retry_after")
                        .and_then(Value::as_f64)
                        .unwrap_or(1.0);

                    debug!("Rate limited on {bucket}; retrying in {retry_after}s.");
                    self.limiter
                        .reserve(&bucket, Duration::from_secs_f64(retry_after));
                },
                other => return Err(Error::UnexpectedStatus(other, data)),
            }
        }
    }

    pub async fn fetch_user(&self, user_id: &UserId) -> error::Result<User> {
        let data = self
            .request(Route::user(user_id.as_str()), None, &[])
            .await?;

        serde_json::from_value(data).map_err(Error::Json)
    }

    /// Lists the emojis owned by the application identity.
    pub async fn application_emojis(&self, application_id: &UserId) -> error::Result<Vec<Emoji>> {
        let data = self
            .request(Route::application_emojis(application_id.as_str()), None, &[])
            .await?;

        let items = data.get("items").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(items).map_err(Error::Json)
    }

    pub async fn create_application_emoji(
        &self,
        application_id: &UserId,
        name: &str,
        image: &[u8],
    ) -> error::Result<Emoji> {
        let body = json!({ "name": name, "image": image_data_uri(image) });
        let data = self
            .request(
                Route::new(
                    Method::POST,
                    &["applications", application_id.as_str(), "emojis"],
                ),
                Some(body),
                &[],
            )
            .await?;

        serde_json::from_value(data).map_err(Error::Json)
    }

    pub async fn edit_application_emoji(
        &self,
        application_id: &UserId,
        emoji_id: &EmojiId,
        name: Option<&str>,
        image: Option<&[u8]>,
    ) -> error::Result<Emoji> {
        let mut body = json!({});
        if let Some(name) = name {
            body["name"] = Value::from(name);
        }
        if let Some(image) = image {
            body["image"] = Value::from(image_data_uri(image));
        }

        let data = self
            .request(
                Route::application_emoji(
                    Method::PATCH,
                    application_id.as_str(),
                    emoji_id.as_str(),
                ),
                Some(body),
                &[],
            )
            .await?;

        serde_json::from_value(data).map_err(Error::Json)
    }

    pub async fn delete_application_emoji(
        &self,
        application_id: &UserId,
        emoji_id: &EmojiId,
    ) -> error::Result<()> {
        self.request(
            Route::application_emoji(
                Method::DELETE,
                application_id.as_str(),
                emoji_id.as_str(),
            ),
            None,
            &[],
        )
        .await
        .map(|_| ())
    }

    /// Sends a message, optionally with file attachments.
    pub async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
        files: &[AttachmentFile],
    ) -> error::Result<Message> {
        let body = json!({
            "content": content,
            "allowed_mentions": { "parse": [], "replied_user": false },
        });

        let data = self
            .request(Route::channel_messages(channel_id), Some(body), files)
            .await?;

        serde_json::from_value(data).map_err(Error::Json)
    }

    pub async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> error::Result<Message> {
        let body = json!({ "content": content });
        let data = self
            .request(
                Route::channel_message(Method::PATCH, channel_id, message_id),
                Some(body),
                &[],
            )
            .await?;

        serde_json::from_value(data).map_err(Error::Json)
    }

    pub async fn delete_message(&self, channel_id: &str, message_id: &str) -> error::Result<()> {
        self.request(
            Route::channel_message(Method::DELETE, channel_id, message_id),
            None,
            &[],
        )
        .await
        .map(|_| ())
    }

    pub async fn trigger_typing(&self, channel_id: &str) -> error::Result<()> {
        self.request(Route::typing(channel_id), None, &[])
            .await
            .map(|_| ())
    }
}

/// Inlines an image as a `data:` URI, sniffing the format from its magic
/// bytes.
fn image_data_uri(image: &[u8]) -> String {
    let mime = if image.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if image.starts_with(&[0xff, 0xd8]) {
        "image/jpeg"
    } else if image.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "image/png"
    };

    format!("data:{mime};base64,{}", BASE64.encode(image))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    /// Serves canned HTTP responses over one connection.
    async fn serve_responses(responses: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];

            for response in responses {
                // Requests here are header-only; one read drains each.
                let _ = stream.read(&mut buf).await.unwrap();
                stream.write_all(response.as_bytes()).await.unwrap();
            }
        });

        format!("http://{addr}")
    }

    fn json_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn throttled_request_sleeps_and_resends() {
        let base = serve_responses(vec![
            json_response("429 Too Many Requests", r#"{"retry_after":0.2}"#),
            json_response("200 OK", r#"{"id":"9","username":"ok"}"#),
        ])
        .await;

        let http = Http::new("token").with_base_url(base);
        let started = std::time::Instant::now();

        let user = http.fetch_user(&UserId::from("9")).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(190));
        assert_eq!(user.username, "ok");
    }

    #[tokio::test]
    async fn classified_errors_carry_status_message_and_body() {
        let base = serve_responses(vec![json_response(
            "403 Forbidden",
            r#"{"message":"Missing Access","code":50001}"#,
        )])
        .await;

        let http = Http::new("token").with_base_url(base);

        match http.fetch_user(&UserId::from("9")).await {
            Err(Error::Api(e)) => {
                assert_eq!(e.status, 403);
                assert_eq!(e.message, "Missing Access");
                assert_eq!(e.raw["code"], 50001);
            },
            other => panic!("expected classified error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reservations_do_not_block_unrelated_routes() {
        let limiter = RateLimiter::default();
        limiter.reserve("GET /users/1", Duration::from_secs(30));

        let started = std::time::Instant::now();
        limiter.acquire("GET /users/2").await;

        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
