//! Outbound sequence numbering.

use std::sync::atomic::{AtomicI64, Ordering};

/// How outbound `seq` values are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeqMode {
    /// Every outbound message gets the next value of a counter starting at 1.
    #[default]
    Monotonic,
    /// Every outbound message carries `seq: 0`.
    Fixed,
}

impl std::str::FromStr for SeqMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monotonic" => Ok(Self::Monotonic),
            "fixed" => Ok(Self::Fixed),
            other => Err(format!(
                "unknown seq mode '{other}' (expected 'monotonic' or 'fixed')"
            )),
        }
    }
}

/// Per-session sequence state, shared by the request loop and the event
/// forwarder.
#[derive(Debug)]
pub struct Sequencer {
    mode: SeqMode,
    next: AtomicI64,
    current_request: AtomicI64,
}

impl Sequencer {
    pub fn new(mode: SeqMode) -> Self {
        Self {
            mode,
            next: AtomicI64::new(1),
            current_request: AtomicI64::new(0),
        }
    }

    /// Allocate the `seq` for the next outbound message.
    pub fn next_seq(&self) -> i64 {
        match self.mode {
            SeqMode::Fixed => 0,
            SeqMode::Monotonic => self.next.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Record the `seq` of the request now being handled.
    pub fn begin_request(&self, seq: i64) {
        self.current_request.store(seq, Ordering::SeqCst);
    }

    /// The `seq` of the request being handled; echoed as `request_seq`.
    pub fn current_request_seq(&self) -> i64 {
        self.current_request.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn monotonic_starts_at_one() {
        let seq = Sequencer::new(SeqMode::Monotonic);
        assert_eq!(seq.next_seq(), 1);
        assert_eq!(seq.next_seq(), 2);
        assert_eq!(seq.next_seq(), 3);
    }

    #[test]
    fn fixed_is_always_zero() {
        let seq = Sequencer::new(SeqMode::Fixed);
        for _ in 0..5 {
            assert_eq!(seq.next_seq(), 0);
        }
    }

    #[test]
    fn current_request_tracks_latest() {
        let seq = Sequencer::new(SeqMode::default());
        assert_eq!(seq.current_request_seq(), 0);
        seq.begin_request(4);
        assert_eq!(seq.current_request_seq(), 4);
        seq.begin_request(5);
        assert_eq!(seq.current_request_seq(), 5);
    }

    #[test]
    fn monotonic_values_unique_across_threads() {
        let seq = Arc::new(Sequencer::new(SeqMode::Monotonic));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || (0..100).map(|_| seq.next_seq()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
        assert_eq!(all.first(), Some(&1));
        assert_eq!(all.last(), Some(&400));
    }

    #[test]
    fn seq_mode_from_str() {
        assert_eq!("monotonic".parse::<SeqMode>().unwrap(), SeqMode::Monotonic);
        assert_eq!("fixed".parse::<SeqMode>().unwrap(), SeqMode::Fixed);
        assert!("random".parse::<SeqMode>().is_err());
    }
}
