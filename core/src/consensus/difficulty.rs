//! Difficulty retargeting.
//!
//! Every `retarget_window` blocks, the difficulty is recomputed from how
//! long that window actually took versus the target. Blocks in between
//! retarget boundaries inherit their parent's difficulty. Every node
//! computes this independently from chain history, so there is nothing to
//! gossip: the validator simply rejects a header whose `difficulty`
//! disagrees.

use super::config::ConsensusConfig;

/// Returns `true` if `height` is a retarget boundary, i.e. the height at
/// which a new difficulty value takes effect.
pub fn is_retarget_height(height: u64, retarget_window: u64) -> bool {
    height != 0 && height % retarget_window == 0
}

/// Computes the difficulty that must apply at `height`, given the parent's
/// difficulty and, if `height` is a retarget boundary, the timestamps of
/// the tip and of the block `retarget_window` heights back.
pub fn next_difficulty(
    cfg: &ConsensusConfig,
    height: u64,
    parent_difficulty: u64,
    window_start_timestamp: u64,
    window_end_timestamp: u64,
) -> u64 {
    if !is_retarget_height(height, cfg.retarget_window) {
        return parent_difficulty;
    }

    let delta_t = window_end_timestamp
        .saturating_sub(window_start_timestamp)
        .max(1);
    let ratio = (cfg.retarget_target_secs as f64 / delta_t as f64)
        .clamp(cfg.retarget_clamp_min, cfg.retarget_clamp_max);
    let scaled = (parent_difficulty as f64 * ratio).round();
    if scaled < 1.0 { 1 } else { scaled as u64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retarget_heights_inherit_parent_difficulty() {
        let cfg = ConsensusConfig::default();
        assert_eq!(next_difficulty(&cfg, 1, 7, 0, 0), 7);
        assert_eq!(next_difficulty(&cfg, 99, 7, 0, 0), 7);
    }

    #[test]
    fn faster_than_target_cadence_raises_difficulty() {
        // S7: 100 blocks at 7.5s cadence -> Δt = 750s, target 1500s.
        // ratio = clamp(1500/750, 0.25, 4.0) = 2.0.
        let cfg = ConsensusConfig {
            retarget_window: 100,
            ..ConsensusConfig::default()
        };
        let new_diff = next_difficulty(&cfg, 100, 10, 0, 750);
        assert_eq!(new_diff, 20);
    }

    #[test]
    fn ratio_is_clamped() {
        let cfg = ConsensusConfig::default();
        // Extremely fast window: ratio would be huge, clamped to 4.0.
        let new_diff = next_difficulty(&cfg, 100, 10, 0, 1);
        assert_eq!(new_diff, 40);
        // Extremely slow window: ratio would be tiny, clamped to 0.25.
        let new_diff = next_difficulty(&cfg, 100, 10, 0, 1_000_000);
        assert_eq!(new_diff, 3); // round(10 * 0.25) = 3 (2.5 rounds to 3, see note below)
    }
}
