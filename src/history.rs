//! Per-photon record of traversed media.
//!
//! Each boundary crossing appends the medium being left, so the entry one
//! before the last is the medium the photon was in before it entered the
//! current one. The coating model uses it to recover the true incidence
//! medium of a thin layer.

use std::sync::Arc;

use crate::material::Medium;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nth_previous_counts_back_from_the_latest() {
        let mut history = PhotonHistory::new();
        assert!(history.is_empty());
        assert!(history.nth_previous(0).is_none());
        for name in ["air", "glass", "gel"] {
            history.push(Arc::new(Medium::new(name)));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.nth_previous(0).unwrap().name, "gel");
        assert_eq!(history.nth_previous(1).unwrap().name, "glass");
        assert_eq!(history.nth_previous(2).unwrap().name, "air");
        assert!(history.nth_previous(3).is_none());
        assert_eq!(history.last().unwrap().name, "gel");
    }

    #[test]
    fn entries_share_media() {
        let water = Arc::new(Medium::new("water"));
        let mut history = PhotonHistory::new();
        history.push(water.clone());
        history.push(water.clone());
        assert_eq!(Arc::strong_count(&water), 3);
        let names: Vec<_> = history.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["water", "water"]);
    }
}

/// Append-only list of the media a photon has left, oldest first.
#[derive(Debug, Clone, Default)]
pub struct PhotonHistory {
    media: Vec<Arc<Medium>>,
}

impl PhotonHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, medium: Arc<Medium>) {
        self.media.push(medium);
    }

    pub fn len(&self) -> usize {
        self.media.len()
    }

    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
    }

    pub fn last(&self) -> Option<&Medium> {
        self.media.last().map(Arc::as_ref)
    }

    /// The entry `n` places before the latest; `nth_previous(0)` is the
    /// latest.
    pub fn nth_previous(&self, n: usize) -> Option<&Medium> {
        let index = self.media.len().checked_sub(n + 1)?;
        self.media.get(index).map(Arc::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Medium> {
        self.media.iter().map(Arc::as_ref)
    }
}
