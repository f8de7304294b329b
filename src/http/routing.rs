//! Request routes, doubling as rate-limit bucket identities.

use reqwest::Method;
use std::fmt;

/// Identity of one HTTP endpoint call: method plus templated path with
/// concrete ids substituted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

impl Route {
    /// Builds a route from path segments, e.g. `["users", id]`.
    pub fn new<S: AsRef<str>>(method: Method, segments: &[S]) -> Self {
        let mut path = String::new();
        for segment in segments {
            path.push('/');
            path.push_str(segment.as_ref());
        }

        Self { method, path }
    }

    /// The rate-limit bucket key for this route.
    #[must_use]
    pub fn bucket(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    pub fn user(user_id: &str) -> Self {
        Self::new(Method::GET, &["users", user_id])
    }

    pub fn channel_messages(channel_id: &str) -> Self {
        Self::new(Method::POST, &["channels", channel_id, "messages"])
    }

    pub fn channel_message(method: Method, channel_id: &str, message_id: &str) -> Self {
        Self::new(method, &["channels", channel_id, "messages", message_id])
    }

    pub fn typing(channel_id: &str) -> Self {
        Self::new(Method::POST, &["channels", channel_id, "typing"])
    }

    pub fn application_emojis(application_id: &str) -> Self {
        Self::new(Method::GET, &["applications", application_id, "emojis"])
    }

    pub fn application_emoji(method: Method, application_id: &str, emoji_id: &str) -> Self {
        Self::new(method, &["applications", application_id, "emojis", emoji_id])
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bucket_identity_includes_method_and_concrete_path() {
        let get = Route::user("123");
        let same = Route::user("123");
        let other = Route::user("456");

        assert_eq!(get.bucket(), same.bucket());
        assert_ne!(get.bucket(), other.bucket());
        assert_eq!(get.path, "/users/123");
    }
}
