use std::sync::Arc;

/// How a [`TokenCounter`] produced its numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMode {
    /// A real encoder was available; counts are close to the provider's.
    ExactIsh,
    /// Byte-length heuristic; not portable across encoders.
    Estimate,
}

impl CounterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterMode::ExactIsh => "exact-ish",
            CounterMode::Estimate => "estimate",
        }
    }
}

/// Pluggable exact encoder: text in, token count out.
pub type ExactEncoder = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Deterministic token counter. Uses an injected encoder when one is
/// available; otherwise falls back to `ceil(len / 3.5)`.
#[derive(Clone, Default)]
pub struct TokenCounter {
    encoder: Option<ExactEncoder>,
}

impl TokenCounter {
    /// Heuristic-only counter.
    pub fn heuristic() -> Self {
        Self { encoder: None }
    }

    /// Counter backed by a real encoder.
    pub fn with_encoder(encoder: ExactEncoder) -> Self {
        Self {
            encoder: Some(encoder),
        }
    }

    pub fn mode(&self) -> CounterMode {
        if self.encoder.is_some() {
            CounterMode::ExactIsh
        } else {
            CounterMode::Estimate
        }
    }

    /// Count tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        match &self.encoder {
            Some(enc) => enc(text),
            None => (text.len() as f64 / 3.5).ceil() as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_is_ceil_len_over_3_5() {
        let counter = TokenCounter::heuristic();
        assert_eq!(counter.count(&"x".repeat(35)), 10);
        assert_eq!(counter.count(&"x".repeat(36)), 11);
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("a"), 1);
        assert_eq!(counter.mode(), CounterMode::Estimate);
        assert_eq!(counter.mode().as_str(), "estimate");
    }

    #[test]
    fn encoder_wins_when_present() {
        let counter = TokenCounter::with_encoder(Arc::new(|s: &str| s.split_whitespace().count()));
        assert_eq!(counter.count("one two three"), 3);
        assert_eq!(counter.mode(), CounterMode::ExactIsh);
        assert_eq!(counter.mode().as_str(), "exact-ish");
    }
}
