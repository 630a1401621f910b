//! The node's JSON RPC surface: submitting transactions and querying
//! blocks, accounts, the mempool, and inclusion proofs.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use ledger_core::{
    crypto, Account, Block, BlockHash, BlockStore, Hash256, PubKey, StateView, Transaction,
    ValidationError,
};

use crate::p2p::message::TxAnnounce;
use crate::p2p::Message;
use crate::state::AppState;

type SharedState = Arc<AppState>;
type ApiError = (StatusCode, Json<ErrorBody>);

/// RPC error payload. `error_kind` is a stable, machine-matchable category
/// (spec §6/§7); `error` is a human-readable rendering for logs and
/// debugging, not meant to be pattern-matched by callers.
#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_kind: &'static str,
}

fn bad_request(kind: &'static str, msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: msg.into(), error_kind: kind }))
}

fn not_found(msg: impl Into<String>) -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorBody { error: msg.into(), error_kind: "not_found" }))
}

fn parse_block_hash(hex_str: &str) -> Result<BlockHash, ApiError> {
    Hash256::from_hex(hex_str).map(BlockHash).map_err(|_| bad_request("malformed_encoding", "invalid block hash"))
}

fn parse_hash(hex_str: &str) -> Result<Hash256, ApiError> {
    Hash256::from_hex(hex_str).map_err(|_| bad_request("malformed_encoding", "invalid hash"))
}

/// Stable, low-cardinality category for a rejected transaction. Uses the
/// same vocabulary as the `consensus_blocks_rejected_total` metric label in
/// `AppState`, so a categorical RPC error and a rejected-block metric always
/// agree on what to call a given failure.
fn validation_error_kind(err: &ValidationError) -> &'static str {
    match err {
        ValidationError::MalformedEncoding => "malformed_encoding",
        ValidationError::InvalidSignature => "invalid_signature",
        ValidationError::NonceMismatch(_) => "nonce_mismatch",
        ValidationError::InsufficientBalance => "insufficient_balance",
        ValidationError::FeeBelowMinimum => "fee_below_minimum",
        ValidationError::ReferenceNotFound => "reference_not_found",
        ValidationError::ReferenceWrongKind => "reference_wrong_kind",
        ValidationError::LimitExceeded(_) => "limit_exceeded",
        ValidationError::ConsensusViolation(_) => "consensus_violation",
        ValidationError::UnknownParent => "unknown_parent",
        ValidationError::ReorgTooDeep => "reorg_too_deep",
    }
}

#[derive(Serialize)]
pub struct SubmitTxResponse {
    pub tx_hash: String,
}

/// `POST /tx`
///
/// Validates and admits a transaction into the local mempool, then gossips
/// it to every connected peer.
pub async fn submit_transaction(
    State(state): State<SharedState>,
    Json(tx): Json<Transaction>,
) -> Result<(StatusCode, Json<SubmitTxResponse>), ApiError> {
    let hash = tx.tx_hash();
    let inserted = {
        let engine = state.engine.lock().await;
        let chain_view = state.chain_view(&engine);
        let mut mempool = state.mempool.lock().await;
        mempool.insert(tx, engine.state(), &chain_view)
    };

    inserted.map_err(|e| bad_request(validation_error_kind(&e), e.to_string()))?;

    state.metrics.consensus.mempool_size.set(state.mempool.lock().await.len() as i64);
    if state.peers.mark_seen(hash).await {
        state.peers.broadcast(Message::TxAnnounce(TxAnnounce { hash }), None).await;
    }

    Ok((StatusCode::ACCEPTED, Json(SubmitTxResponse { tx_hash: hash.to_hex() })))
}

/// `GET /block/latest`
pub async fn get_latest_block(State(state): State<SharedState>) -> Result<Json<Block>, ApiError> {
    let engine = state.engine.lock().await;
    let tip = engine.tip().ok_or_else(|| not_found("chain has no blocks yet"))?;
    engine.store().get_block(&tip).map(Json).ok_or_else(|| not_found("tip block missing from store"))
}

/// `GET /block/:hash`
pub async fn get_block(
    State(state): State<SharedState>,
    Path(hash_hex): Path<String>,
) -> Result<Json<Block>, ApiError> {
    let hash = parse_block_hash(&hash_hex)?;
    let engine = state.engine.lock().await;
    engine.store().get_block(&hash).map(Json).ok_or_else(|| not_found("block not found"))
}

/// `GET /tx/:hash`
///
/// Looks in the mempool first, then the active chain.
pub async fn get_transaction(
    State(state): State<SharedState>,
    Path(hash_hex): Path<String>,
) -> Result<Json<Transaction>, ApiError> {
    let hash = parse_hash(&hash_hex)?;

    if let Some(tx) = state.mempool.lock().await.get(&hash) {
        return Ok(Json(tx.clone()));
    }
    state.find_confirmed_tx(&hash).await.map(Json).ok_or_else(|| not_found("transaction not found"))
}

/// `GET /account/:pubkey`
pub async fn get_account(
    State(state): State<SharedState>,
    Path(pubkey_hex): Path<String>,
) -> Result<Json<Account>, ApiError> {
    let pubkey = PubKey::from_hex(&pubkey_hex).map_err(|_| bad_request("malformed_encoding", "invalid public key"))?;
    let engine = state.engine.lock().await;
    Ok(Json(engine.state().account(&pubkey)))
}

#[derive(Serialize)]
pub struct MempoolResponse {
    pub count: usize,
    pub tx_hashes: Vec<String>,
}

/// `GET /mempool`
pub async fn get_mempool(State(state): State<SharedState>) -> Json<MempoolResponse> {
    let mempool = state.mempool.lock().await;
    Json(MempoolResponse {
        count: mempool.len(),
        tx_hashes: mempool.hashes().iter().map(Hash256::to_hex).collect(),
    })
}

#[derive(Serialize)]
pub struct MerkleProofResponse {
    pub root: String,
    pub leaf: String,
    pub index: usize,
    pub path: Vec<String>,
}

/// `GET /block/:hash/merkle-proof/:index`
///
/// Proves inclusion of the transaction at `index` under the block's
/// `tx_merkle_root`.
pub async fn get_merkle_proof(
    State(state): State<SharedState>,
    Path((hash_hex, index)): Path<(String, usize)>,
) -> Result<Json<MerkleProofResponse>, ApiError> {
    let hash = parse_block_hash(&hash_hex)?;
    let block = {
        let engine = state.engine.lock().await;
        engine.store().get_block(&hash)
    }
    .ok_or_else(|| not_found("block not found"))?;

    if index >= block.txs.len() {
        return Err(bad_request("limit_exceeded", "tx index out of range"));
    }

    let leaves: Vec<Hash256> = block.txs.iter().map(Transaction::tx_hash).collect();
    let path = ledger_core::merkle_proof(&leaves, index);

    Ok(Json(MerkleProofResponse {
        root: block.header.tx_merkle_root.to_hex(),
        leaf: leaves[index].to_hex(),
        index,
        path: path.iter().map(Hash256::to_hex).collect(),
    }))
}

#[derive(Serialize)]
pub struct StateProofResponse {
    pub root: String,
    pub account: Account,
    pub index: usize,
    pub path: Vec<String>,
}

/// Leaf hash for `pk`/`acc` in the account-state Merkle tree, matching
/// `ledger_core::consensus::validator::state_root`'s per-account encoding.
fn state_leaf(pk: &PubKey, acc: &Account) -> Hash256 {
    crypto::hash_canonical(&serde_json::json!([pk, acc.balance, acc.nonce]))
}

/// `GET /account/:pubkey/state-proof`
///
/// Proves inclusion of an account's `(balance, nonce)` under the current
/// tip's `state_root`.
pub async fn get_state_proof(
    State(state): State<SharedState>,
    Path(pubkey_hex): Path<String>,
) -> Result<Json<StateProofResponse>, ApiError> {
    let pubkey = PubKey::from_hex(&pubkey_hex).map_err(|_| bad_request("malformed_encoding", "invalid public key"))?;

    let engine = state.engine.lock().await;
    let accounts: Vec<(PubKey, Account)> = engine.state().snapshot().into_iter().collect();
    let Some(index) = accounts.iter().position(|(pk, _)| *pk == pubkey) else {
        return Err(not_found("account has no materialized state entry"));
    };

    let leaves: Vec<Hash256> = accounts.iter().map(|(pk, acc)| state_leaf(pk, acc)).collect();
    let root = ledger_core::merkle_root(&leaves);
    let path = ledger_core::merkle_proof(&leaves, index);

    Ok(Json(StateProofResponse {
        root: root.to_hex(),
        account: accounts[index].1,
        index,
        path: path.iter().map(Hash256::to_hex).collect(),
    }))
}
