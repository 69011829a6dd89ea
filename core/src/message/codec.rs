// core/src/message/codec.rs

//! JSON wire codec.
//!
//! One encoding is pinned for every link: a JSON object with the keys
//! `MessageType`, `ContentType`, `Content`, `MessageBoxName`,
//! `CorrelationId` and `AnswerContentType`. Absent optional fields encode as
//! `null`; decoding accepts `null` or an omitted key. Any missing required
//! field, invalid UTF-8 or empty `ContentType` decodes to
//! [`MeshError::MalformedMessage`], which the receiving loop logs and drops
//! without disturbing the link.

use crate::error::{MeshError, MeshResult};
use crate::message::types::{AnswerMessage, QuestionMessage, TellMessage};

pub fn encode_tell(message: &TellMessage) -> MeshResult<Vec<u8>> {
  serde_json::to_vec(message).map_err(|e| MeshError::malformed(e.to_string()))
}

pub fn encode_question(message: &QuestionMessage) -> MeshResult<Vec<u8>> {
  serde_json::to_vec(message).map_err(|e| MeshError::malformed(e.to_string()))
}

pub fn encode_answer(message: &AnswerMessage) -> MeshResult<Vec<u8>> {
  serde_json::to_vec(message).map_err(|e| MeshError::malformed(e.to_string()))
}

pub fn decode_tell(payload: &[u8]) -> MeshResult<TellMessage> {
  let message: TellMessage =
    serde_json::from_slice(payload).map_err(|e| MeshError::malformed(e.to_string()))?;
  require_content_type(&message.content_type)?;
  require_box_name(&message.message_box_name)?;
  Ok(message)
}

pub fn decode_question(payload: &[u8]) -> MeshResult<QuestionMessage> {
  let message: QuestionMessage =
    serde_json::from_slice(payload).map_err(|e| MeshError::malformed(e.to_string()))?;
  require_content_type(&message.content_type)?;
  require_box_name(&message.message_box_name)?;
  require_correlation_id(&message.correlation_id)?;
  Ok(message)
}

pub fn decode_answer(payload: &[u8]) -> MeshResult<AnswerMessage> {
  let message: AnswerMessage =
    serde_json::from_slice(payload).map_err(|e| MeshError::malformed(e.to_string()))?;
  require_content_type(&message.content_type)?;
  require_correlation_id(&message.correlation_id)?;
  Ok(message)
}

fn require_content_type(content_type: &str) -> MeshResult<()> {
  if content_type.is_empty() {
    return Err(MeshError::malformed("empty ContentType"));
  }
  Ok(())
}

fn require_box_name(name: &str) -> MeshResult<()> {
  if name.is_empty() {
    return Err(MeshError::malformed("empty MessageBoxName"));
  }
  Ok(())
}

fn require_correlation_id(correlation_id: &str) -> MeshResult<()> {
  if correlation_id.is_empty() {
    return Err(MeshError::malformed("empty CorrelationId"));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::types::MessageType;

  fn sample_question() -> QuestionMessage {
    QuestionMessage {
      message_type: MessageType::Question,
      content_type: "sum".into(),
      content: Some("42".into()),
      message_box_name: "calc".into(),
      correlation_id: "a1b2c3d4e5f60718293a4b5c6d7e8f90".into(),
      answer_content_type: Some("int".into()),
    }
  }

  #[test]
  fn question_round_trips() {
    let question = sample_question();
    let bytes = encode_question(&question).unwrap();
    let decoded = decode_question(&bytes).unwrap();
    assert_eq!(decoded, question);
    // encode(decode(x)) == x at the byte level as well
    assert_eq!(encode_question(&decoded).unwrap(), bytes);
  }

  #[test]
  fn tell_round_trips_with_absent_content() {
    let tell = TellMessage {
      message_type: MessageType::Tell,
      content_type: "ping".into(),
      content: None,
      message_box_name: "probe".into(),
    };
    let bytes = encode_tell(&tell).unwrap();
    let text = std::str::from_utf8(&bytes).unwrap();
    assert!(text.contains("\"Content\":null"));
    let decoded = decode_tell(&bytes).unwrap();
    assert_eq!(decoded.content, None);
  }

  #[test]
  fn absent_content_key_decodes_to_none() {
    let raw = br#"{"MessageType":"Tell","ContentType":"ping","MessageBoxName":"probe"}"#;
    let decoded = decode_tell(raw).unwrap();
    assert_eq!(decoded.content, None);
  }

  #[test]
  fn keys_use_pascal_case() {
    let bytes = encode_question(&sample_question()).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    for key in [
      "MessageType",
      "ContentType",
      "Content",
      "MessageBoxName",
      "CorrelationId",
      "AnswerContentType",
    ] {
      assert!(value.get(key).is_some(), "missing key {key}");
    }
  }

  #[test]
  fn missing_correlation_id_is_malformed() {
    let raw = br#"{"MessageType":"Question","ContentType":"sum","MessageBoxName":"calc"}"#;
    assert!(matches!(
      decode_question(raw),
      Err(MeshError::MalformedMessage(_))
    ));
  }

  #[test]
  fn empty_content_type_is_malformed() {
    let raw = br#"{"MessageType":"Tell","ContentType":"","Content":null,"MessageBoxName":"probe"}"#;
    assert!(matches!(decode_tell(raw), Err(MeshError::MalformedMessage(_))));
  }

  #[test]
  fn garbage_is_malformed() {
    assert!(matches!(
      decode_answer(b"\xff\xfenot json"),
      Err(MeshError::MalformedMessage(_))
    ));
  }

  #[test]
  fn message_type_parses_case_sensitively() {
    assert_eq!("Tell".parse::<MessageType>().unwrap(), MessageType::Tell);
    assert!("tell".parse::<MessageType>().is_err());
    assert!("Ask".parse::<MessageType>().is_err());
  }
}
