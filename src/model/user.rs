use crate::id::UserId;
use serde::{Deserialize, Serialize};

/// A platform user, as observed through events or REST lookups.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl User {
    /// Whether `name` matches this user's username or display name,
    /// ignoring case. Used for convenience lookups only.
    #[must_use]
    pub fn named(&self, name: &str) -> bool {
        self.username.eq_ignore_ascii_case(name)
            || self
                .global_name
                .as_deref()
                .is_some_and(|g| g.eq_ignore_ascii_case(name))
    }
}

/// Presence data attached to a member, or sent with IDENTIFY.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Presence {
    pub status: String,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub afk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
}

impl Presence {
    /// An online presence with a single playing activity.
    #[must_use]
    pub fn playing(name: impl Into<String>) -> Self {
        Self {
            status: "online".into(),
            activities: vec![Activity {
                name: name.into(),
                kind: 0,
            }],
            afk: false,
            since: None,
        }
    }
}

/// A single activity entry within a presence.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
}
