// core/src/mailbox/cache.rs

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::message::Answer;

/// Outcome of checking an inbound question's correlation id against the
/// dedup set and the answer cache.
pub(crate) enum QuestionSeen {
  /// Never seen before; the id is now marked in-flight.
  First,
  /// Seen but not yet answered; the retry is dropped and the original
  /// delivery will produce the answer.
  InFlight,
  /// Already answered within the TTL; the cached answer serves the retry.
  Cached(Answer),
}

struct CachedEntry {
  answer: Answer,
  expires_at: Instant,
}

/// At-most-once answer cache plus the correlation-id dedup set.
///
/// Both maps are pruned on every observation so correlation ids become
/// reusable once their TTL passes.
pub(crate) struct AnswerCache {
  state: Mutex<CacheState>,
  ttl: Duration,
}

struct CacheState {
  seen: HashMap<String, Instant>,
  answers: HashMap<String, CachedEntry>,
}

impl AnswerCache {
  pub fn new(ttl: Duration) -> Self {
    Self {
      state: Mutex::new(CacheState {
        seen: HashMap::new(),
        answers: HashMap::new(),
      }),
      ttl,
    }
  }

  /// Classifies `correlation_id`, marking it in-flight when first seen.
  pub fn observe(&self, correlation_id: &str) -> QuestionSeen {
    let now = Instant::now();
    let mut state = self.state.lock();
    Self::prune_locked(&mut state, now);

    if let Some(entry) = state.answers.get(correlation_id) {
      return QuestionSeen::Cached(entry.answer.clone());
    }
    if state.seen.contains_key(correlation_id) {
      return QuestionSeen::InFlight;
    }
    state.seen.insert(correlation_id.to_string(), now + self.ttl);
    QuestionSeen::First
  }

  /// Records the answer produced for `correlation_id` so retries within the
  /// TTL are served without re-invoking the handler.
  pub fn store(&self, correlation_id: &str, answer: Answer) {
    let now = Instant::now();
    let mut state = self.state.lock();
    Self::prune_locked(&mut state, now);
    state.answers.insert(
      correlation_id.to_string(),
      CachedEntry {
        answer,
        expires_at: now + self.ttl,
      },
    );
  }

  fn prune_locked(state: &mut CacheState, now: Instant) {
    let CacheState { seen, answers } = state;
    answers.retain(|_, entry| entry.expires_at > now);
    // Keep a dedup entry alive while its answer is still cached, so retries
    // keep hitting the cache rather than re-running the handler.
    seen.retain(|id, expires_at| *expires_at > now || answers.contains_key(id));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn first_then_in_flight_then_cached() {
    let cache = AnswerCache::new(Duration::from_secs(60));
    assert!(matches!(cache.observe("c1"), QuestionSeen::First));
    assert!(matches!(cache.observe("c1"), QuestionSeen::InFlight));

    cache.store("c1", Answer::new("int", "42"));
    match cache.observe("c1") {
      QuestionSeen::Cached(answer) => assert_eq!(answer.content_str(), Some("42")),
      _ => panic!("expected cached answer"),
    }
  }

  #[test]
  fn entries_expire_and_ids_become_reusable() {
    let cache = AnswerCache::new(Duration::from_millis(20));
    assert!(matches!(cache.observe("c1"), QuestionSeen::First));
    cache.store("c1", Answer::new("int", "1"));
    std::thread::sleep(Duration::from_millis(40));
    assert!(matches!(cache.observe("c1"), QuestionSeen::First));
  }

  #[test]
  fn unanswered_ids_expire_too() {
    let cache = AnswerCache::new(Duration::from_millis(20));
    assert!(matches!(cache.observe("c1"), QuestionSeen::First));
    std::thread::sleep(Duration::from_millis(40));
    assert!(matches!(cache.observe("c1"), QuestionSeen::First));
  }
}
