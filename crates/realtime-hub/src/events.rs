//! Hub event names, server methods and their payloads.

use crate::{RealtimeError, RealtimeResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Events pushed by the comments hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HubEvent {
    ReceiveComment,
    UpdateComment,
    DeleteComment,
    UpdateLikes,
}

impl HubEvent {
    pub const ALL: [HubEvent; 4] = [
        HubEvent::ReceiveComment,
        HubEvent::UpdateComment,
        HubEvent::DeleteComment,
        HubEvent::UpdateLikes,
    ];

    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            HubEvent::ReceiveComment => "ReceiveComment",
            HubEvent::UpdateComment => "UpdateComment",
            HubEvent::DeleteComment => "DeleteComment",
            HubEvent::UpdateLikes => "UpdateLikes",
        }
    }

    /// Look up an event by wire name. Hub method names are matched
    /// case-insensitively, as the server does.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for HubEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server methods invoked by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMethod {
    JoinTemplateGroup,
    LeaveTemplateGroup,
}

impl HubMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubMethod::JoinTemplateGroup => "JoinTemplateGroup",
            HubMethod::LeaveTemplateGroup => "LeaveTemplateGroup",
        }
    }
}

impl fmt::Display for HubMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentAuthor {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Payload of `ReceiveComment` and `UpdateComment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub content: String,
    /// ISO-8601 timestamp as sent by the server.
    pub created_at: String,
    pub user: CommentAuthor,
}

/// Payload of `UpdateLikes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikesUpdate {
    pub count: i64,
    pub template_id: String,
}

impl Comment {
    pub fn from_arguments(event: HubEvent, arguments: &[Value]) -> RealtimeResult<Self> {
        argument(event, arguments, 0)
    }
}

impl LikesUpdate {
    pub fn from_arguments(arguments: &[Value]) -> RealtimeResult<Self> {
        Ok(Self {
            count: argument(HubEvent::UpdateLikes, arguments, 0)?,
            template_id: argument(HubEvent::UpdateLikes, arguments, 1)?,
        })
    }
}

/// `DeleteComment` carries only the comment id.
pub fn deleted_comment_id(arguments: &[Value]) -> RealtimeResult<String> {
    argument(HubEvent::DeleteComment, arguments, 0)
}

fn argument<T: DeserializeOwned>(
    event: HubEvent,
    arguments: &[Value],
    index: usize,
) -> RealtimeResult<T> {
    let value = arguments.get(index).ok_or_else(|| RealtimeError::Payload {
        event: event.to_string(),
        reason: format!("missing argument {index}"),
    })?;

    T::deserialize(value).map_err(|e| RealtimeError::Payload {
        event: event.to_string(),
        reason: format!("argument {index}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names() {
        assert_eq!(HubEvent::from_name("UpdateLikes"), Some(HubEvent::UpdateLikes));
        assert_eq!(HubEvent::from_name("receivecomment"), Some(HubEvent::ReceiveComment));
        assert_eq!(HubEvent::from_name("Unknown"), None);
        assert_eq!(HubMethod::JoinTemplateGroup.to_string(), "JoinTemplateGroup");
    }

    #[test]
    fn test_comment_payload() {
        let args = vec![json!({
            "id": "c-1",
            "content": "Nice form",
            "createdAt": "2024-11-02T10:00:00Z",
            "user": { "id": "u-1", "name": "Ada", "email": "ada@example.com" }
        })];

        let comment = Comment::from_arguments(HubEvent::ReceiveComment, &args).unwrap();
        assert_eq!(comment.id, "c-1");
        assert_eq!(comment.user.name, "Ada");
    }

    #[test]
    fn test_likes_payload() {
        let update = LikesUpdate::from_arguments(&[json!(12), json!("tmpl-1")]).unwrap();
        assert_eq!(
            update,
            LikesUpdate {
                count: 12,
                template_id: "tmpl-1".into()
            }
        );
    }

    #[test]
    fn test_payload_errors_name_the_event() {
        let err = LikesUpdate::from_arguments(&[json!(3)]).unwrap_err();
        assert!(matches!(
            err,
            RealtimeError::Payload { ref event, .. } if event == "UpdateLikes"
        ));

        let err = deleted_comment_id(&[json!(42)]).unwrap_err();
        assert!(err.to_string().contains("DeleteComment"));
    }
}
