use crate::activity::{
    ActivityEvent, ActivityMessage, ActivityRecord, ActivityType, CategoryTag, EventCategory,
};
use crate::dead_letter::DeadLetterRecord;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("unrecognized activity type: {0}")]
    UnrecognizedActivityType(String),
    #[error("activity type {0} belongs to no event type set")]
    UnsupportedActivityType(ActivityType),
    #[error("unrecognized category: {0}")]
    UnrecognizedCategory(String),
    #[error("{activity_type} payload missing {field}")]
    MissingField {
        field: &'static str,
        activity_type: ActivityType,
    },
}

/// Request body stored by the remote-call and publisher dead-letter writers.
/// Listener dead letters store the event itself, hence the alias.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityRequest {
    member_id: i64,
    #[serde(default)]
    post_id: Option<i64>,
    #[serde(default)]
    comment_id: Option<i64>,
    #[serde(alias = "memberActivityType")]
    activity_type: String,
}

pub fn decode_envelope(payload: &str) -> Result<ActivityMessage, TransformError> {
    serde_json::from_str(payload).map_err(|err| TransformError::Malformed(err.to_string()))
}

pub fn transform_record(record: &DeadLetterRecord) -> Result<ActivityRecord, TransformError> {
    transform_payload(
        &record.payload,
        record.category.as_ref(),
        record.message_key.clone(),
    )
}

/// Declared category wins; without one the payload must be an envelope and
/// is dispatched by type-set membership of its activity type.
pub fn transform_payload(
    payload: &str,
    category: Option<&CategoryTag>,
    message_key: Option<String>,
) -> Result<ActivityRecord, TransformError> {
    match category {
        Some(CategoryTag::Known(category)) => {
            let request: ActivityRequest = serde_json::from_str(payload)
                .map_err(|err| TransformError::Malformed(err.to_string()))?;
            let activity_type = parse_activity_type(&request.activity_type)?;
            shape(
                *category,
                request.member_id,
                request.post_id,
                request.comment_id,
                activity_type,
                message_key,
            )
        }
        Some(CategoryTag::Unrecognized(value)) => {
            Err(TransformError::UnrecognizedCategory(value.clone()))
        }
        None => {
            let message = decode_envelope(payload)?;
            let key = message_key.or(message.key);
            transform_event(&message.event, key)
        }
    }
}

fn transform_event(
    event: &ActivityEvent,
    message_key: Option<String>,
) -> Result<ActivityRecord, TransformError> {
    let activity_type = parse_activity_type(&event.member_activity_type)?;
    let set = activity_type
        .type_set()
        .ok_or(TransformError::UnsupportedActivityType(activity_type))?;
    shape(
        set.category(),
        event.member_id,
        event.post_id,
        event.comment_id,
        activity_type,
        message_key,
    )
}

fn parse_activity_type(value: &str) -> Result<ActivityType, TransformError> {
    value
        .parse::<ActivityType>()
        .map_err(|_| TransformError::UnrecognizedActivityType(value.to_string()))
}

fn shape(
    category: EventCategory,
    member_id: i64,
    post_id: Option<i64>,
    comment_id: Option<i64>,
    activity_type: ActivityType,
    message_key: Option<String>,
) -> Result<ActivityRecord, TransformError> {
    let require = |value: Option<i64>, field: &'static str| {
        value.ok_or(TransformError::MissingField {
            field,
            activity_type,
        })
    };
    let record = match category {
        EventCategory::Post => {
            ActivityRecord::post(member_id, require(post_id, "postId")?, activity_type, message_key)
        }
        EventCategory::Comment => ActivityRecord::comment(
            member_id,
            require(post_id, "postId")?,
            require(comment_id, "commentId")?,
            activity_type,
            message_key,
        ),
        EventCategory::PostLike => ActivityRecord::post_like(
            member_id,
            require(post_id, "postId")?,
            activity_type,
            message_key,
        ),
        EventCategory::CommentLike => ActivityRecord::comment_like(
            member_id,
            require(comment_id, "commentId")?,
            activity_type,
            message_key,
        ),
        EventCategory::Member => ActivityRecord::member(member_id, activity_type, message_key),
    };
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 23, 14, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn envelope(key: Option<&str>, activity_type: &str) -> String {
        serde_json::json!({
            "key": key,
            "event": {
                "memberId": 1,
                "postId": 10,
                "commentId": 100,
                "memberActivityType": activity_type,
                "createdAt": "2026-02-23T13:00:00Z"
            }
        })
        .to_string()
    }

    #[test]
    fn envelope_dispatch_shapes_each_type_set() {
        let post = transform_payload(&envelope(Some("k1"), "POST_CREATE"), None, None)
            .expect("post");
        assert_eq!(post.post_id, Some(10));
        assert_eq!(post.comment_id, None);
        assert_eq!(post.message_key.as_deref(), Some("k1"));

        let comment =
            transform_payload(&envelope(None, "COMMENT_UPDATE"), None, None).expect("comment");
        assert_eq!((comment.post_id, comment.comment_id), (Some(10), Some(100)));

        let post_like =
            transform_payload(&envelope(None, "POST_LIKE_CANCEL"), None, None).expect("like");
        assert_eq!((post_like.post_id, post_like.comment_id), (Some(10), None));

        let comment_like =
            transform_payload(&envelope(None, "COMMENT_LIKE"), None, None).expect("like");
        assert_eq!(
            (comment_like.post_id, comment_like.comment_id),
            (None, Some(100))
        );
        assert_eq!(comment_like.activity_type, ActivityType::CommentLike);
    }

    #[test]
    fn envelope_with_member_type_is_unsupported() {
        let err = transform_payload(&envelope(None, "MEMBER_FOLLOW"), None, None)
            .expect_err("member type");
        assert_eq!(
            err,
            TransformError::UnsupportedActivityType(ActivityType::MemberFollow)
        );
    }

    #[test]
    fn envelope_with_unknown_type_is_rejected() {
        let err = transform_payload(&envelope(None, "POST_BOOKMARK"), None, None)
            .expect_err("unknown type");
        assert!(matches!(err, TransformError::UnrecognizedActivityType(_)));
    }

    #[test]
    fn record_key_overrides_envelope_key() {
        let record = transform_payload(
            &envelope(Some("inner"), "POST_READ"),
            None,
            Some("outer".to_string()),
        )
        .expect("post");
        assert_eq!(record.message_key.as_deref(), Some("outer"));
    }

    #[test]
    fn declared_category_reads_request_body() {
        let payload = r#"{"memberId":3,"postId":4,"activityType":"POST_LIKE"}"#;
        let tag = CategoryTag::Known(EventCategory::PostLike);
        let record = transform_payload(payload, Some(&tag), None).expect("post like");
        assert_eq!(record, ActivityRecord::post_like(3, 4, ActivityType::PostLike, None));
    }

    #[test]
    fn declared_member_category_keeps_member_only() {
        let payload = r#"{"memberId":3,"postId":4,"activityType":"MEMBER_FOLLOW"}"#;
        let tag = CategoryTag::Known(EventCategory::Member);
        let record = transform_payload(payload, Some(&tag), Some("m1".to_string()))
            .expect("member");
        assert_eq!(
            record,
            ActivityRecord::member(3, ActivityType::MemberFollow, Some("m1".to_string()))
        );
    }

    #[test]
    fn declared_category_accepts_event_field_name() {
        let payload = r#"{"memberId":3,"postId":4,"commentId":5,"memberActivityType":"COMMENT_CREATE"}"#;
        let tag = CategoryTag::Known(EventCategory::Comment);
        let record = transform_payload(payload, Some(&tag), None).expect("comment");
        assert_eq!(record.comment_id, Some(5));
    }

    #[test]
    fn unrecognized_category_is_error() {
        let tag = CategoryTag::parse("BOOKMARK");
        let err = transform_payload("{}", Some(&tag), None).expect_err("bad category");
        assert_eq!(err, TransformError::UnrecognizedCategory("BOOKMARK".to_string()));
    }

    #[test]
    fn missing_id_is_error() {
        let payload = r#"{"memberId":3,"postId":4,"activityType":"COMMENT_LIKE"}"#;
        let tag = CategoryTag::Known(EventCategory::CommentLike);
        let err = transform_payload(payload, Some(&tag), None).expect_err("missing id");
        assert_eq!(
            err,
            TransformError::MissingField {
                field: "commentId",
                activity_type: ActivityType::CommentLike
            }
        );
    }

    #[test]
    fn transform_record_uses_stored_key() {
        let record = DeadLetterRecord::new(
            Some("k9".to_string()),
            envelope(None, "POST_DELETE"),
            None,
            ts(),
        );
        let activity = transform_record(&record).expect("transform");
        assert_eq!(activity.message_key.as_deref(), Some("k9"));
        assert_eq!(activity.activity_type, ActivityType::PostDelete);
    }

    #[test]
    fn malformed_json_is_error() {
        assert!(matches!(
            transform_payload("not json", None, None),
            Err(TransformError::Malformed(_))
        ));
    }
}
