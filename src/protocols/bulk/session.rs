//! Per-connection streaming progress.

/// Initial xorshift state for every new connection.
pub const RNG_SEED: u64 = 4;

/// Streaming progress for one connection.
///
/// Owned by the connection's producer and dropped with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// Bytes of the message already emitted.
    pub position: usize,
    /// Payload generator state.
    pub rng: u64,
}

impl SessionState {
    /// Create a session at the start of the message.
    pub fn new() -> Self {
        Self {
            position: 0,
            rng: RNG_SEED,
        }
    }

    /// Rewind to the start of the message with a freshly seeded generator.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Bytes still to emit for a message of `total` bytes.
    pub fn remaining(&self, total: usize) -> usize {
        total.saturating_sub(self.position)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset() {
        let mut session = SessionState {
            position: 500,
            rng: 0xdead_beef,
        };
        session.reset();
        assert_eq!(session, SessionState::new());
        assert_eq!(session.rng, RNG_SEED);
    }

    #[test]
    fn test_remaining() {
        let session = SessionState {
            position: 1000,
            rng: RNG_SEED,
        };
        assert_eq!(session.remaining(3000), 2000);
        assert_eq!(session.remaining(1000), 0);
    }
}
