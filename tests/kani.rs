//! Kani formal verification harnesses for staking-derivatives-prog.
//!
//! Run with: `cargo kani --tests`
//!
//! These harnesses prove ledger-level properties:
//! - Deposits keep stake and issued tokens in lockstep
//! - Failed transitions leave the pool untouched
//! - Emergency penalties stay within `1..=amount`
//! - Compounding always makes progress on a staked pool
//! - Stake always equals issued tokens (1:1 backing)
//! - Any withdrawal within the stake succeeds
//!
//! Note: account binding and registry storage are NOT modeled.

#![cfg(kani)]

extern crate kani;

use staking_derivatives_prog::{
    error::StakingError,
    ledger,
    policy::{PolicyV1, RewardPolicy},
    state::StakingPool,
};

/// Pool with 1:1 backing and otherwise symbolic counters.
fn any_conserved_pool() -> StakingPool {
    let total_staked: u64 = kani::any();
    StakingPool {
        is_initialized: kani::any(),
        total_staked,
        total_issued_tokens: total_staked,
        accumulated_fees: kani::any(),
        total_compounded_rewards: kani::any(),
        emergency_unstake_penalties: kani::any(),
        reward_checkpoint: kani::any(),
    }
}

fn conserved(p: &StakingPool) -> bool {
    p.total_staked == p.total_issued_tokens
}

// =============================================================================
// A. POLICY BOUNDS
// =============================================================================

/// Prove: penalty on a positive amount is at least 1 and never exceeds the amount
#[kani::proof]
fn kani_penalty_within_amount() {
    let amount: u64 = kani::any();
    kani::assume(amount > 0);
    let penalty = PolicyV1.emergency_penalty(amount).unwrap();
    assert!(penalty >= 1);
    assert!(penalty <= amount);
}

/// Prove: a pool with stake always has a positive net compound reward
#[kani::proof]
fn kani_compound_net_positive() {
    let pool = any_conserved_pool();
    kani::assume(pool.total_staked > 0);
    let quote = PolicyV1.compound_quote(&pool).unwrap();
    assert!(quote.net > 0);
    assert_eq!(quote.gross, quote.net + quote.fee);
}

// =============================================================================
// B. ATOMICITY
// =============================================================================

/// Prove: a rejected withdraw leaves every field unchanged
#[kani::proof]
fn kani_withdraw_failure_is_atomic() {
    let mut pool = any_conserved_pool();
    let before = pool;
    let amount: u64 = kani::any();

    if ledger::withdraw(&mut pool, amount, &PolicyV1).is_err() {
        assert_eq!(pool, before);
    }
}

/// Prove: withdrawing more than is staked is always InsufficientFunds
#[kani::proof]
fn kani_withdraw_over_stake_rejected() {
    let mut pool = any_conserved_pool();
    let amount: u64 = kani::any();
    kani::assume(amount > pool.total_staked);
    assert_eq!(ledger::withdraw(&mut pool, amount, &PolicyV1), Err(StakingError::InsufficientFunds));
}

/// Prove: a withdrawal or emergency unstake within the stake always succeeds
/// and splits the amount between fee and payout
#[kani::proof]
fn kani_exit_within_stake_succeeds() {
    let pool = any_conserved_pool();
    kani::assume(pool.accumulated_fees <= u64::MAX / 2);
    kani::assume(pool.emergency_unstake_penalties <= u64::MAX / 2);
    let amount: u64 = kani::any();
    kani::assume(amount > 0 && amount <= pool.total_staked);

    let mut withdrawn = pool;
    let w = ledger::withdraw(&mut withdrawn, amount, &PolicyV1).unwrap();
    assert_eq!(w.fee + w.payout, amount);
    assert_eq!(withdrawn.total_staked, pool.total_staked - amount);

    let mut unstaked = pool;
    let u = ledger::emergency_unstake(&mut unstaked, amount, &PolicyV1).unwrap();
    assert_eq!(u.penalty + u.payout, amount);
    assert_eq!(unstaked.total_staked, pool.total_staked - amount);
}

/// Prove: a rejected emergency unstake leaves every field unchanged
#[kani::proof]
fn kani_emergency_failure_is_atomic() {
    let mut pool = any_conserved_pool();
    let before = pool;
    let amount: u64 = kani::any();

    if ledger::emergency_unstake(&mut pool, amount, &PolicyV1).is_err() {
        assert_eq!(pool, before);
    }
}

// =============================================================================
// C. CONSERVATION
// =============================================================================

/// Prove: deposit moves stake and issued tokens by the same amount
#[kani::proof]
fn kani_deposit_conserves() {
    let mut pool = any_conserved_pool();
    let before = pool;
    let amount: u64 = kani::any();

    if ledger::deposit_and_mint(&mut pool, amount).is_ok() {
        assert!(pool.is_initialized);
        assert_eq!(pool.total_staked - before.total_staked, amount);
        assert_eq!(pool.total_issued_tokens - before.total_issued_tokens, amount);
        assert!(conserved(&pool));
    }
}

/// Prove: every successful transition preserves staked == issued
#[kani::proof]
fn kani_transitions_conserve() {
    let mut pool = any_conserved_pool();
    let amount: u64 = kani::any();
    let op: u8 = kani::any();

    let ok = match op % 4 {
        0 => ledger::withdraw(&mut pool, amount, &PolicyV1).is_ok(),
        1 => ledger::emergency_unstake(&mut pool, amount, &PolicyV1).is_ok(),
        2 => ledger::compound_rewards(&mut pool, &PolicyV1).is_ok(),
        _ => ledger::distribute_rewards(&mut pool, &PolicyV1, kani::any()).is_ok(),
    };
    if ok {
        assert!(conserved(&pool));
    }
}
