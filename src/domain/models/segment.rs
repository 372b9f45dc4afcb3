use super::UsageSnapshot;

/// A demultiplexed piece of a generation stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Usage(UsageSnapshot),
}
