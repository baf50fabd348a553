//! Configure records and the state request order

use crate::protocol::ConfigFlags;

/// A server configuration proposal, in protocol units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigRecord {
    pub serial: u32,
    pub width: u32,
    pub height: u32,
    pub flags: ConfigFlags,
}

impl ConfigRecord {
    pub fn new(serial: u32, width: u32, height: u32, flags: ConfigFlags) -> Self {
        Self {
            serial,
            width,
            height,
            flags,
        }
    }

    /// Whether the client may present `width`x`height` with `flags` under
    /// this record. Negotiated states must match exactly; a zero size in the
    /// record accepts any size. The resizing hint never blocks a match.
    pub fn is_compatible(&self, width: u32, height: u32, flags: ConfigFlags) -> bool {
        if (self.flags & ConfigFlags::NEGOTIATED) != (flags & ConfigFlags::NEGOTIATED) {
            return false;
        }
        (self.width == 0 && self.height == 0) || (self.width == width && self.height == height)
    }
}

/// A missing record is never compatible.
pub fn compatible(record: Option<&ConfigRecord>, width: u32, height: u32, flags: ConfigFlags) -> bool {
    record.is_some_and(|r| r.is_compatible(width, height, flags))
}

/// Window state requests, in the only order they may be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    UnsetMaximized,
    UnsetFullscreen,
    SetMaximized,
    SetFullscreen,
}

/// Requests moving the tracked states `from` to `to`: unsets before sets,
/// maximized before fullscreen.
pub fn state_changes(from: ConfigFlags, to: ConfigFlags) -> Vec<StateChange> {
    let mut changes = Vec::with_capacity(4);
    if from.contains(ConfigFlags::MAXIMIZED) && !to.contains(ConfigFlags::MAXIMIZED) {
        changes.push(StateChange::UnsetMaximized);
    }
    if from.contains(ConfigFlags::FULLSCREEN) && !to.contains(ConfigFlags::FULLSCREEN) {
        changes.push(StateChange::UnsetFullscreen);
    }
    if !from.contains(ConfigFlags::MAXIMIZED) && to.contains(ConfigFlags::MAXIMIZED) {
        changes.push(StateChange::SetMaximized);
    }
    if !from.contains(ConfigFlags::FULLSCREEN) && to.contains(ConfigFlags::FULLSCREEN) {
        changes.push(StateChange::SetFullscreen);
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn flags() -> impl Strategy<Value = ConfigFlags> {
        (0u32..8).prop_map(ConfigFlags::from_bits_truncate)
    }

    #[test]
    fn test_zero_size_accepts_any_size() {
        let record = ConfigRecord::new(1, 0, 0, ConfigFlags::empty());
        assert!(record.is_compatible(800, 600, ConfigFlags::empty()));
        assert!(!record.is_compatible(800, 600, ConfigFlags::MAXIMIZED));
    }

    #[test]
    fn test_size_mismatch_is_incompatible() {
        let record = ConfigRecord::new(1, 800, 600, ConfigFlags::empty());
        assert!(!record.is_compatible(1024, 768, ConfigFlags::empty()));
        assert!(record.is_compatible(800, 600, ConfigFlags::empty()));
    }

    #[test]
    fn test_resizing_hint_does_not_block() {
        let record = ConfigRecord::new(4, 640, 480, ConfigFlags::RESIZING);
        assert!(record.is_compatible(640, 480, ConfigFlags::empty()));
    }

    #[test]
    fn test_missing_record_is_incompatible() {
        assert!(!compatible(None, 0, 0, ConfigFlags::empty()));
    }

    #[test]
    fn test_maximize_to_fullscreen_order() {
        assert_eq!(
            state_changes(ConfigFlags::MAXIMIZED, ConfigFlags::FULLSCREEN),
            vec![StateChange::UnsetMaximized, StateChange::SetFullscreen]
        );
        assert_eq!(
            state_changes(ConfigFlags::empty(), ConfigFlags::NEGOTIATED),
            vec![StateChange::SetMaximized, StateChange::SetFullscreen]
        );
        assert!(state_changes(ConfigFlags::MAXIMIZED, ConfigFlags::MAXIMIZED).is_empty());
    }

    proptest! {
        #[test]
        fn prop_compatible_is_reflexive(w in 0u32..4096, h in 0u32..4096, f in flags(), serial in any::<u32>()) {
            let record = ConfigRecord::new(serial, w, h, f);
            prop_assert!(record.is_compatible(w, h, f));
        }

        #[test]
        fn prop_zero_record_accepts_any_size(w in 0u32..4096, h in 0u32..4096, f in flags()) {
            let record = ConfigRecord::new(1, 0, 0, f);
            prop_assert!(record.is_compatible(w, h, f));
        }

        #[test]
        fn prop_negotiated_mismatch_never_compatible(w in 1u32..4096, h in 1u32..4096, a in flags(), b in flags()) {
            prop_assume!((a & ConfigFlags::NEGOTIATED) != (b & ConfigFlags::NEGOTIATED));
            let record = ConfigRecord::new(1, w, h, a);
            prop_assert!(!record.is_compatible(w, h, b));
        }

        #[test]
        fn prop_unsets_always_precede_sets(from in flags(), to in flags()) {
            let changes = state_changes(from, to);
            let first_set = changes
                .iter()
                .position(|c| matches!(c, StateChange::SetMaximized | StateChange::SetFullscreen))
                .unwrap_or(changes.len());
            prop_assert!(changes[first_set..]
                .iter()
                .all(|c| matches!(c, StateChange::SetMaximized | StateChange::SetFullscreen)));

            // Applying the changes reaches the target negotiated states
            let mut state = from & ConfigFlags::NEGOTIATED;
            for change in changes {
                match change {
                    StateChange::UnsetMaximized => state.remove(ConfigFlags::MAXIMIZED),
                    StateChange::UnsetFullscreen => state.remove(ConfigFlags::FULLSCREEN),
                    StateChange::SetMaximized => state.insert(ConfigFlags::MAXIMIZED),
                    StateChange::SetFullscreen => state.insert(ConfigFlags::FULLSCREEN),
                }
            }
            prop_assert_eq!(state, to & ConfigFlags::NEGOTIATED);
        }
    }
}
