use std::fmt;

use uuid::Uuid;

/// Handle for one connected observer. The hub numbers observers in
/// connection order, starting at 1.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

/// One relay pipeline run, from accepted request to verdict or failure.
///
/// Backed by a UUID v7, so runs order by submission time.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0.simple())
    }
}
