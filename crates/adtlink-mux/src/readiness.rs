use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// What the multiplexer believes about the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Readiness {
    /// No instance to ask; reported after release.
    Unknown = 0,
    /// A reset notification arrived and no CONNECT has followed yet.
    NotReady = 1,
    Ready = 2,
}

impl Readiness {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Readiness::NotReady,
            2 => Readiness::Ready,
            _ => Readiness::Unknown,
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Readiness::Unknown => "unknown",
            Readiness::NotReady => "not-ready",
            Readiness::Ready => "ready",
        })
    }
}

/// Lock-free cell holding a [`Readiness`].
#[derive(Debug)]
pub(crate) struct ReadinessCell(AtomicU8);

impl ReadinessCell {
    pub fn new(initial: Readiness) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> Readiness {
        Readiness::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store `next`, returning the previous state.
    pub fn swap(&self, next: Readiness) -> Readiness {
        Readiness::from_u8(self.0.swap(next as u8, Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_reports_previous_state() {
        let cell = ReadinessCell::new(Readiness::Ready);
        assert_eq!(cell.swap(Readiness::NotReady), Readiness::Ready);
        assert_eq!(cell.get(), Readiness::NotReady);
        assert_eq!(cell.get().to_string(), "not-ready");
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Readiness::NotReady).unwrap(),
            "\"not_ready\""
        );
    }
}
