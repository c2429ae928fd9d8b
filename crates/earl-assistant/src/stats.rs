use chrono::{DateTime, Utc};

/// Lifetime and per-turn token/cost bookkeeping for one [`Session`](crate::session::Session).
#[derive(Debug, Clone, Default)]
pub struct Stats {
    // Lifetime totals.
    pub lifetime_input_tokens: u64,
    pub lifetime_output_tokens: u64,
    pub lifetime_cost: f64,
    pub model_id: Option<String>,

    // Per-turn.
    pub turn_input_tokens: u64,
    pub turn_output_tokens: u64,
    pub turn_cache_read_tokens: u64,
    pub turn_cache_creation_tokens: u64,
    pub message_sent_at: Option<DateTime<Utc>>,
    pub first_token_at: Option<DateTime<Utc>>,
    pub complete_at: Option<DateTime<Utc>>,

    pub context_window: Option<u64>,
}

impl Stats {
    /// `(turn_input + cache_read + cache_creation) / context_window * 100`.
    /// `None` when the window is unknown or the numerator is zero.
    pub fn context_percent(&self) -> Option<f64> {
        let window = self.context_window?;
        if window == 0 {
            return None;
        }
        let numerator =
            self.turn_input_tokens + self.turn_cache_read_tokens + self.turn_cache_creation_tokens;
        if numerator == 0 {
            return None;
        }
        Some((numerator as f64 / window as f64) * 100.0)
    }

    /// `turn_output_tokens / (complete_at - first_token_at)`.
    /// `None` if duration <= 0 or output tokens <= 0.
    pub fn tokens_per_second(&self) -> Option<f64> {
        let first = self.first_token_at?;
        let complete = self.complete_at?;
        let duration_secs = (complete - first).num_milliseconds() as f64 / 1000.0;
        if duration_secs <= 0.0 || self.turn_output_tokens == 0 {
            return None;
        }
        Some(self.turn_output_tokens as f64 / duration_secs)
    }

    /// Clear per-turn fields only; lifetime totals and model id survive.
    pub fn reset_turn(&mut self) {
        self.turn_input_tokens = 0;
        self.turn_output_tokens = 0;
        self.turn_cache_read_tokens = 0;
        self.turn_cache_creation_tokens = 0;
        self.message_sent_at = None;
        self.first_token_at = None;
        self.complete_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn context_percent_none_when_window_unknown() {
        let stats = Stats::default();
        assert_eq!(stats.context_percent(), None);
    }

    #[test]
    fn context_percent_none_when_numerator_zero() {
        let stats = Stats {
            context_window: Some(200_000),
            ..Default::default()
        };
        assert_eq!(stats.context_percent(), None);
    }

    #[test]
    fn context_percent_computed() {
        let stats = Stats {
            context_window: Some(1000),
            turn_input_tokens: 100,
            turn_cache_read_tokens: 50,
            ..Default::default()
        };
        assert_eq!(stats.context_percent(), Some(15.0));
    }

    #[test]
    fn tokens_per_second_none_when_timestamps_missing() {
        let stats = Stats::default();
        assert_eq!(stats.tokens_per_second(), None);
    }

    #[test]
    fn tokens_per_second_none_when_duration_non_positive() {
        let now = Utc::now();
        let stats = Stats {
            first_token_at: Some(now),
            complete_at: Some(now),
            turn_output_tokens: 10,
            ..Default::default()
        };
        assert_eq!(stats.tokens_per_second(), None);
    }

    #[test]
    fn tokens_per_second_computed() {
        let start = Utc::now();
        let stats = Stats {
            first_token_at: Some(start),
            complete_at: Some(start + Duration::seconds(2)),
            turn_output_tokens: 100,
            ..Default::default()
        };
        assert_eq!(stats.tokens_per_second(), Some(50.0));
    }

    #[test]
    fn reset_turn_preserves_lifetime_fields() {
        let mut stats = Stats {
            lifetime_input_tokens: 500,
            model_id: Some("claude-sonnet-4-6".to_string()),
            turn_input_tokens: 10,
            first_token_at: Some(Utc::now()),
            ..Default::default()
        };
        stats.reset_turn();
        assert_eq!(stats.lifetime_input_tokens, 500);
        assert_eq!(stats.model_id.as_deref(), Some("claude-sonnet-4-6"));
        assert_eq!(stats.turn_input_tokens, 0);
        assert!(stats.first_token_at.is_none());
    }
}
