use super::Snapshot;

/// Indices that went low → high between two snapshots.
///
/// Only activation counts; a point that stays high or drops never shows up.
/// Snapshots of different length compare over the shorter prefix, but the
/// poll loop rejects such reads before they get here.
pub fn detect_rising_edges(previous: &Snapshot, current: &Snapshot) -> Vec<usize> {
    previous
        .points()
        .iter()
        .zip(current.points())
        .enumerate()
        .filter(|(_, (&before, &now))| !before && now)
        .map(|(index, _)| index)
        .collect()
}

/// Indices that went high → low. Logged, never dispatched.
pub fn detect_falling_edges(previous: &Snapshot, current: &Snapshot) -> Vec<usize> {
    previous
        .points()
        .iter()
        .zip(current.points())
        .enumerate()
        .filter(|(_, (&before, &now))| before && !now)
        .map(|(index, _)| index)
        .collect()
}
