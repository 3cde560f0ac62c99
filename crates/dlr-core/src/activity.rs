use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    Post,
    Comment,
    PostLike,
    CommentLike,
    Member,
}

impl EventCategory {
    pub const ALL: [EventCategory; 5] = [
        EventCategory::Post,
        EventCategory::Comment,
        EventCategory::PostLike,
        EventCategory::CommentLike,
        EventCategory::Member,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Post => "POST",
            EventCategory::Comment => "COMMENT",
            EventCategory::PostLike => "POST_LIKE",
            EventCategory::CommentLike => "COMMENT_LIKE",
            EventCategory::Member => "MEMBER",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_uppercase().replace('-', "_");
        match normalized.as_str() {
            "POST" => Ok(EventCategory::Post),
            "COMMENT" => Ok(EventCategory::Comment),
            "POST_LIKE" => Ok(EventCategory::PostLike),
            "COMMENT_LIKE" => Ok(EventCategory::CommentLike),
            "MEMBER" => Ok(EventCategory::Member),
            other => Err(format!("Unknown category: {other}")),
        }
    }
}

/// Category as declared by a holding area. Stores keep whatever string the
/// producer wrote, so an unrecognized value has to survive until transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryTag {
    Known(EventCategory),
    Unrecognized(String),
}

impl CategoryTag {
    pub fn parse(value: &str) -> Self {
        match value.parse::<EventCategory>() {
            Ok(category) => CategoryTag::Known(category),
            Err(_) => CategoryTag::Unrecognized(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CategoryTag::Known(category) => category.as_str(),
            CategoryTag::Unrecognized(value) => value.as_str(),
        }
    }
}

impl From<EventCategory> for CategoryTag {
    fn from(category: EventCategory) -> Self {
        CategoryTag::Known(category)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    PostCreate,
    PostUpdate,
    PostDelete,
    PostRead,
    CommentCreate,
    CommentUpdate,
    CommentDelete,
    PostLike,
    PostLikeCancel,
    CommentLike,
    CommentLikeCancel,
    MemberFollow,
    MemberUnfollow,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::PostCreate => "POST_CREATE",
            ActivityType::PostUpdate => "POST_UPDATE",
            ActivityType::PostDelete => "POST_DELETE",
            ActivityType::PostRead => "POST_READ",
            ActivityType::CommentCreate => "COMMENT_CREATE",
            ActivityType::CommentUpdate => "COMMENT_UPDATE",
            ActivityType::CommentDelete => "COMMENT_DELETE",
            ActivityType::PostLike => "POST_LIKE",
            ActivityType::PostLikeCancel => "POST_LIKE_CANCEL",
            ActivityType::CommentLike => "COMMENT_LIKE",
            ActivityType::CommentLikeCancel => "COMMENT_LIKE_CANCEL",
            ActivityType::MemberFollow => "MEMBER_FOLLOW",
            ActivityType::MemberUnfollow => "MEMBER_UNFOLLOW",
        }
    }

    pub fn type_set(&self) -> Option<TypeSet> {
        TypeSet::ALL
            .into_iter()
            .find(|set| set.members().contains(self))
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_uppercase();
        match normalized.as_str() {
            "POST_CREATE" => Ok(ActivityType::PostCreate),
            "POST_UPDATE" => Ok(ActivityType::PostUpdate),
            "POST_DELETE" => Ok(ActivityType::PostDelete),
            "POST_READ" => Ok(ActivityType::PostRead),
            "COMMENT_CREATE" => Ok(ActivityType::CommentCreate),
            "COMMENT_UPDATE" => Ok(ActivityType::CommentUpdate),
            "COMMENT_DELETE" => Ok(ActivityType::CommentDelete),
            "POST_LIKE" => Ok(ActivityType::PostLike),
            "POST_LIKE_CANCEL" => Ok(ActivityType::PostLikeCancel),
            "COMMENT_LIKE" => Ok(ActivityType::CommentLike),
            "COMMENT_LIKE_CANCEL" => Ok(ActivityType::CommentLikeCancel),
            "MEMBER_FOLLOW" => Ok(ActivityType::MemberFollow),
            "MEMBER_UNFOLLOW" => Ok(ActivityType::MemberUnfollow),
            other => Err(format!("Unknown activity type: {other}")),
        }
    }
}

pub const POST_EVENT_TYPES: [ActivityType; 4] = [
    ActivityType::PostCreate,
    ActivityType::PostUpdate,
    ActivityType::PostDelete,
    ActivityType::PostRead,
];
pub const COMMENT_EVENT_TYPES: [ActivityType; 3] = [
    ActivityType::CommentCreate,
    ActivityType::CommentUpdate,
    ActivityType::CommentDelete,
];
pub const POST_LIKE_EVENT_TYPES: [ActivityType; 2] =
    [ActivityType::PostLike, ActivityType::PostLikeCancel];
pub const COMMENT_LIKE_EVENT_TYPES: [ActivityType; 2] =
    [ActivityType::CommentLike, ActivityType::CommentLikeCancel];

/// The four fixed groupings used when an event arrives without a declared
/// category. Member-only activity types belong to none of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeSet {
    Post,
    Comment,
    PostLike,
    CommentLike,
}

impl TypeSet {
    pub const ALL: [TypeSet; 4] = [
        TypeSet::Post,
        TypeSet::Comment,
        TypeSet::PostLike,
        TypeSet::CommentLike,
    ];

    pub fn members(&self) -> &'static [ActivityType] {
        match self {
            TypeSet::Post => &POST_EVENT_TYPES,
            TypeSet::Comment => &COMMENT_EVENT_TYPES,
            TypeSet::PostLike => &POST_LIKE_EVENT_TYPES,
            TypeSet::CommentLike => &COMMENT_LIKE_EVENT_TYPES,
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            TypeSet::Post => EventCategory::Post,
            TypeSet::Comment => EventCategory::Comment,
            TypeSet::PostLike => EventCategory::PostLike,
            TypeSet::CommentLike => EventCategory::CommentLike,
        }
    }
}

/// Envelope written by the producers into the queue and the failure files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMessage {
    #[serde(default)]
    pub key: Option<String>,
    pub event: ActivityEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub member_id: i64,
    #[serde(default)]
    pub post_id: Option<i64>,
    #[serde(default)]
    pub comment_id: Option<i64>,
    pub member_activity_type: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRecord {
    pub member_id: i64,
    pub post_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub activity_type: ActivityType,
    pub message_key: Option<String>,
}

impl ActivityRecord {
    pub fn post(
        member_id: i64,
        post_id: i64,
        activity_type: ActivityType,
        message_key: Option<String>,
    ) -> Self {
        Self {
            member_id,
            post_id: Some(post_id),
            comment_id: None,
            activity_type,
            message_key,
        }
    }

    pub fn comment(
        member_id: i64,
        post_id: i64,
        comment_id: i64,
        activity_type: ActivityType,
        message_key: Option<String>,
    ) -> Self {
        Self {
            member_id,
            post_id: Some(post_id),
            comment_id: Some(comment_id),
            activity_type,
            message_key,
        }
    }

    pub fn post_like(
        member_id: i64,
        post_id: i64,
        activity_type: ActivityType,
        message_key: Option<String>,
    ) -> Self {
        Self::post(member_id, post_id, activity_type, message_key)
    }

    pub fn comment_like(
        member_id: i64,
        comment_id: i64,
        activity_type: ActivityType,
        message_key: Option<String>,
    ) -> Self {
        Self {
            member_id,
            post_id: None,
            comment_id: Some(comment_id),
            activity_type,
            message_key,
        }
    }

    pub fn member(
        member_id: i64,
        activity_type: ActivityType,
        message_key: Option<String>,
    ) -> Self {
        Self {
            member_id,
            post_id: None,
            comment_id: None,
            activity_type,
            message_key,
        }
    }

    pub fn has_message_key(&self) -> bool {
        self.message_key
            .as_deref()
            .map(|key| !key.is_empty())
            .unwrap_or(false)
    }
}
