use core_affinity::CoreId;
use tracing::{info, warn};

/// Pin the current thread to the first available core from the preference
/// list.
///
/// Returns the core index the thread was pinned to, or `None` when the list
/// is empty, no listed core exists on this machine, or pinning failed. An
/// empty list means the caller runs unpinned by configuration.
pub fn pin_current_thread(preferred: &[usize]) -> Option<usize> {
    if preferred.is_empty() {
        return None;
    }

    let available: Vec<CoreId> = core_affinity::get_core_ids().unwrap_or_default();
    if available.is_empty() {
        warn!("No core ids available; running unpinned");
        return None;
    }

    for &idx in preferred {
        if let Some(core_id) = available.iter().find(|c| c.id == idx) {
            if core_affinity::set_for_current(*core_id) {
                info!("Pinned thread to core {}", idx);
                return Some(idx);
            }
            warn!("Failed to pin thread to core {}", idx);
        } else {
            warn!("Configured core {} does not exist on this machine", idx);
        }
    }

    None
}

/// Number of cores visible to this process
pub fn available_core_count() -> usize {
    core_affinity::get_core_ids()
        .map(|cores| cores.len())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_preference_is_unpinned() {
        assert_eq!(pin_current_thread(&[]), None);
    }

    #[test]
    fn test_nonexistent_core_is_rejected() {
        // No machine has a core with this index
        assert_eq!(pin_current_thread(&[usize::MAX]), None);
    }
}
