//! Genesis parameters and other consensus-level tuning knobs.
//!
//! These MUST be identical across every node on the network: they are
//! part of the protocol, not node-local preference.

/// Consensus configuration: genesis parameters plus implementation-level
/// resource limits.
#[derive(Clone, Debug)]
pub struct ConsensusConfig {
    /// Coinbase reward paid at height 0, before any halving.
    pub initial_reward: u64,
    /// Number of blocks between reward halvings.
    pub halving_interval: u64,
    /// Minimum `gas_fee` accepted on any non-coinbase transaction.
    pub min_gas_fee: u64,
    /// Difficulty (leading zero bits required) at genesis.
    pub initial_difficulty: u64,
    /// Number of blocks between difficulty retargets.
    pub retarget_window: u64,
    /// Target wall-clock span, in seconds, for `retarget_window` blocks.
    pub retarget_target_secs: u64,
    /// Lower clamp on the retarget ratio.
    pub retarget_clamp_min: f64,
    /// Upper clamp on the retarget ratio.
    pub retarget_clamp_max: f64,
    /// How far into the future (seconds) a block's timestamp may be,
    /// relative to wall-clock, before it is rejected.
    pub timestamp_future_tolerance_secs: u64,
    /// Number of preceding block timestamps used to compute the median a
    /// new block's timestamp must exceed.
    pub median_time_span: usize,
    /// Maximum serialized block body size, in bytes.
    pub max_block_size_bytes: usize,
    /// Maximum `post.body` length, in Unicode scalar values.
    pub max_post_body_chars: usize,
    /// Maximum `endorse.message` length, in Unicode scalar values.
    pub max_endorse_message_chars: usize,
    /// Maximum number of entries held in the mempool at once.
    pub max_mempool: usize,
    /// Reorgs deeper than this many blocks are refused outright.
    pub max_reorg_depth: u64,
    /// Fixed timestamp embedded in the genesis block header. Part of the
    /// protocol: every node must compute the same genesis block hash.
    pub genesis_timestamp: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            initial_reward: 50,
            halving_interval: 210_000,
            min_gas_fee: 1,
            initial_difficulty: 1,
            retarget_window: 100,
            retarget_target_secs: 1_500,
            retarget_clamp_min: 0.25,
            retarget_clamp_max: 4.0,
            timestamp_future_tolerance_secs: 120,
            median_time_span: 11,
            max_block_size_bytes: 262_144,
            max_post_body_chars: 300,
            max_endorse_message_chars: 150,
            max_mempool: 50_000,
            max_reorg_depth: 1_000,
            genesis_timestamp: 1_700_000_000,
        }
    }
}
