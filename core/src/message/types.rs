// core/src/message/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MeshError;

/// Discriminates the three payload kinds carried over a mesh link.
///
/// The string form (`"Tell"` / `"Question"` / `"Answer"`, case preserved) is
/// both the JSON `MessageType` value and the leading frame of every
/// DEALER-to-ROUTER message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
  Tell,
  Question,
  Answer,
}

impl MessageType {
  pub fn as_str(&self) -> &'static str {
    match self {
      MessageType::Tell => "Tell",
      MessageType::Question => "Question",
      MessageType::Answer => "Answer",
    }
  }
}

impl fmt::Display for MessageType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for MessageType {
  type Err = MeshError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "Tell" => Ok(MessageType::Tell),
      "Question" => Ok(MessageType::Question),
      "Answer" => Ok(MessageType::Answer),
      other => Err(MeshError::malformed(format!("unknown message type '{other}'"))),
    }
  }
}

/// A one-way notification addressed to a named box.
///
/// `content` is optional on the wire; an absent value is distinct from an
/// empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TellMessage {
  #[serde(rename = "MessageType")]
  pub message_type: MessageType,
  #[serde(rename = "ContentType")]
  pub content_type: String,
  #[serde(rename = "Content", default)]
  pub content: Option<String>,
  #[serde(rename = "MessageBoxName")]
  pub message_box_name: String,
}

/// A request expecting a correlated [`AnswerMessage`] in return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionMessage {
  #[serde(rename = "MessageType")]
  pub message_type: MessageType,
  #[serde(rename = "ContentType")]
  pub content_type: String,
  #[serde(rename = "Content", default)]
  pub content: Option<String>,
  #[serde(rename = "MessageBoxName")]
  pub message_box_name: String,
  /// 128-bit random token binding this question to its answer, hex-encoded.
  #[serde(rename = "CorrelationId")]
  pub correlation_id: String,
  /// Optional hint for the content type of the expected answer. The
  /// answering handler remains authoritative.
  #[serde(rename = "AnswerContentType", default)]
  pub answer_content_type: Option<String>,
}

/// The reply to a [`QuestionMessage`], carrying the same correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerMessage {
  #[serde(rename = "MessageType")]
  pub message_type: MessageType,
  #[serde(rename = "ContentType")]
  pub content_type: String,
  #[serde(rename = "Content", default)]
  pub content: Option<String>,
  #[serde(rename = "MessageBoxName")]
  pub message_box_name: String,
  #[serde(rename = "CorrelationId")]
  pub correlation_id: String,
}

/// The value an answering handler produces and an asking caller receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
  pub content_type: String,
  pub content: Option<String>,
}

impl Answer {
  pub fn new(content_type: impl Into<String>, content: impl Into<String>) -> Self {
    Self {
      content_type: content_type.into(),
      content: Some(content.into()),
    }
  }

  /// An answer whose content is absent (encoded as `null` on the wire).
  pub fn without_content(content_type: impl Into<String>) -> Self {
    Self {
      content_type: content_type.into(),
      content: None,
    }
  }

  pub fn content_str(&self) -> Option<&str> {
    self.content.as_deref()
  }
}
