//! Staking Derivatives: single-file Solana program for a liquid staking pool
//! with inline referral and governance registries.

#![deny(unsafe_code)]

use solana_program::declare_id;

declare_id!("StakeDeriv111111111111111111111111111111111");

// 1. mod constants
pub mod constants {
    use core::mem::size_of;
    use crate::state::{ProposalRecord, ReferralRecord, RegistryHeader, VoteReceipt};

    /// is_initialized (1) + six u64 counters.
    pub const STAKING_POOL_LEN: usize = 1 + 6 * 8;

    pub const MAX_REFERRALS: usize = 64;
    pub const MAX_PROPOSALS: usize = 32;
    pub const MAX_VOTE_RECEIPTS: usize = 128;

    pub const fn align_up(x: usize, a: usize) -> usize {
        (x + (a - 1)) & !(a - 1)
    }

    pub const REGISTRY_OFF: usize = align_up(STAKING_POOL_LEN, 8);

    pub const REGISTRY_HEADER_LEN: usize = size_of::<RegistryHeader>();
    pub const REFERRAL_LEN: usize = size_of::<ReferralRecord>();
    pub const PROPOSAL_LEN: usize = size_of::<ProposalRecord>();
    pub const VOTE_RECEIPT_LEN: usize = size_of::<VoteReceipt>();

    // Offsets below are relative to REGISTRY_OFF.
    pub const REFERRALS_OFF: usize = REGISTRY_HEADER_LEN;
    pub const PROPOSALS_OFF: usize = REFERRALS_OFF + MAX_REFERRALS * REFERRAL_LEN;
    pub const VOTES_OFF: usize = PROPOSALS_OFF + MAX_PROPOSALS * PROPOSAL_LEN;
    pub const REGISTRY_LEN: usize = VOTES_OFF + MAX_VOTE_RECEIPTS * VOTE_RECEIPT_LEN;

    pub const POOL_ACCOUNT_LEN: usize = REGISTRY_OFF + REGISTRY_LEN;
}

// 2. mod error
pub mod error {
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive;
    use solana_program::{
        decode_error::DecodeError,
        msg,
        program_error::{PrintProgramError, ProgramError},
    };
    use thiserror::Error;

    /// Custom error codes are the discriminants, in declaration order.
    #[derive(Clone, Copy, Debug, Eq, Error, FromPrimitive, PartialEq)]
    pub enum StakingError {
        #[error("Unknown instruction opcode")]
        UnknownOpcode,
        #[error("Instruction payload shorter than the opcode's operands")]
        TruncatedPayload,
        #[error("Instruction payload longer than the opcode's operands")]
        TrailingBytes,
        #[error("Vote byte must be 0 or 1")]
        InvalidVote,
        #[error("Wrong number of accounts for this instruction")]
        AccountCountMismatch,
        #[error("Authority account is not a signer")]
        MissingSigner,
        #[error("Pool account is not writable")]
        PoolNotWritable,
        #[error("Pool account data does not match the expected layout")]
        MalformedAccount,
        #[error("Pool has not been initialized by a deposit")]
        PoolNotInitialized,
        #[error("Amount must be greater than zero")]
        InvalidAmount,
        #[error("Insufficient staked funds")]
        InsufficientFunds,
        #[error("No rewards to compound")]
        NothingToCompound,
        #[error("Arithmetic overflow")]
        ArithmeticOverflow,
        #[error("Arithmetic underflow")]
        ArithmeticUnderflow,
        #[error("Proposal does not exist")]
        UnknownProposal,
        #[error("Proposal already exists")]
        DuplicateProposal,
        #[error("Voter already voted on this proposal")]
        DuplicateVote,
        #[error("Referral already exists for this referrer")]
        DuplicateReferral,
        #[error("Referrer key is not valid")]
        InvalidReferrer,
        #[error("Registry table is full")]
        RegistryFull,
        #[error("Signer is not the pool authority")]
        Unauthorized,
        #[error("Unsupported reward policy version")]
        UnsupportedPolicy,
    }

    impl From<StakingError> for ProgramError {
        fn from(e: StakingError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }

    impl<T> DecodeError<T> for StakingError {
        fn type_of() -> &'static str {
            "StakingError"
        }
    }

    impl PrintProgramError for StakingError {
        fn print<E>(&self)
        where
            E: 'static + std::error::Error + DecodeError<E> + PrintProgramError + FromPrimitive,
        {
            msg!("Error: {}", self);
        }
    }
}

// 3. mod ix
pub mod ix {
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive;
    use solana_program::pubkey::Pubkey;
    use crate::error::StakingError;

    #[repr(u8)]
    #[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
    pub enum Opcode {
        DepositAndMint = 0,
        Withdraw = 1,
        CompoundRewards = 2,
        EmergencyUnstake = 3,
        DistributeRewards = 4,
        CreateReferral = 5,
        VoteOnProposal = 6,
        CreateProposal = 7,
    }

    impl Opcode {
        /// Operand bytes that follow the opcode byte.
        pub const fn operand_len(self) -> usize {
            match self {
                Opcode::DepositAndMint
                | Opcode::Withdraw
                | Opcode::EmergencyUnstake
                | Opcode::CreateProposal => 8,
                Opcode::CompoundRewards | Opcode::DistributeRewards => 0,
                Opcode::CreateReferral => 32,
                Opcode::VoteOnProposal => 9,
            }
        }

        /// Signer-bearing opcodes take [pool, authority]; the rest take [pool].
        pub const fn requires_authority(self) -> bool {
            !matches!(self, Opcode::CompoundRewards | Opcode::DistributeRewards)
        }

        pub const fn account_count(self) -> usize {
            if self.requires_authority() { 2 } else { 1 }
        }
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Instruction {
        DepositAndMint { amount: u64 },
        Withdraw { amount: u64 },
        CompoundRewards,
        EmergencyUnstake { amount: u64 },
        DistributeRewards,
        CreateReferral { referrer: Pubkey },
        VoteOnProposal { proposal_id: u64, vote: bool },
        CreateProposal { proposal_id: u64 },
    }

    impl Instruction {
        pub fn decode(input: &[u8]) -> Result<Self, StakingError> {
            let (&tag, mut rest) = input.split_first().ok_or(StakingError::UnknownOpcode)?;
            let opcode = Opcode::from_u8(tag).ok_or(StakingError::UnknownOpcode)?;

            let width = opcode.operand_len();
            if rest.len() < width {
                return Err(StakingError::TruncatedPayload);
            }
            if rest.len() > width {
                return Err(StakingError::TrailingBytes);
            }

            match opcode {
                Opcode::DepositAndMint => {
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::DepositAndMint { amount })
                },
                Opcode::Withdraw => {
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::Withdraw { amount })
                },
                Opcode::CompoundRewards => Ok(Instruction::CompoundRewards),
                Opcode::EmergencyUnstake => {
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::EmergencyUnstake { amount })
                },
                Opcode::DistributeRewards => Ok(Instruction::DistributeRewards),
                Opcode::CreateReferral => {
                    let referrer = read_pubkey(&mut rest)?;
                    Ok(Instruction::CreateReferral { referrer })
                },
                Opcode::VoteOnProposal => {
                    let proposal_id = read_u64(&mut rest)?;
                    let vote = match read_u8(&mut rest)? {
                        0 => false,
                        1 => true,
                        _ => return Err(StakingError::InvalidVote),
                    };
                    Ok(Instruction::VoteOnProposal { proposal_id, vote })
                },
                Opcode::CreateProposal => {
                    let proposal_id = read_u64(&mut rest)?;
                    Ok(Instruction::CreateProposal { proposal_id })
                },
            }
        }

        pub fn opcode(&self) -> Opcode {
            match self {
                Instruction::DepositAndMint { .. } => Opcode::DepositAndMint,
                Instruction::Withdraw { .. } => Opcode::Withdraw,
                Instruction::CompoundRewards => Opcode::CompoundRewards,
                Instruction::EmergencyUnstake { .. } => Opcode::EmergencyUnstake,
                Instruction::DistributeRewards => Opcode::DistributeRewards,
                Instruction::CreateReferral { .. } => Opcode::CreateReferral,
                Instruction::VoteOnProposal { .. } => Opcode::VoteOnProposal,
                Instruction::CreateProposal { .. } => Opcode::CreateProposal,
            }
        }

        pub fn pack(&self) -> Vec<u8> {
            let opcode = self.opcode();
            let mut buf = Vec::with_capacity(1 + opcode.operand_len());
            buf.push(opcode as u8);
            match self {
                Instruction::DepositAndMint { amount }
                | Instruction::Withdraw { amount }
                | Instruction::EmergencyUnstake { amount } => {
                    buf.extend_from_slice(&amount.to_le_bytes());
                },
                Instruction::CompoundRewards | Instruction::DistributeRewards => {},
                Instruction::CreateReferral { referrer } => {
                    buf.extend_from_slice(referrer.as_ref());
                },
                Instruction::VoteOnProposal { proposal_id, vote } => {
                    buf.extend_from_slice(&proposal_id.to_le_bytes());
                    buf.push(*vote as u8);
                },
                Instruction::CreateProposal { proposal_id } => {
                    buf.extend_from_slice(&proposal_id.to_le_bytes());
                },
            }
            buf
        }
    }

    fn read_u8(input: &mut &[u8]) -> Result<u8, StakingError> {
        let (&val, rest) = input.split_first().ok_or(StakingError::TruncatedPayload)?;
        *input = rest;
        Ok(val)
    }

    fn read_u64(input: &mut &[u8]) -> Result<u64, StakingError> {
        if input.len() < 8 { return Err(StakingError::TruncatedPayload); }
        let (bytes, rest) = input.split_at(8);
        *input = rest;
        let bytes: [u8; 8] = bytes.try_into().map_err(|_| StakingError::TruncatedPayload)?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_pubkey(input: &mut &[u8]) -> Result<Pubkey, StakingError> {
        if input.len() < 32 { return Err(StakingError::TruncatedPayload); }
        let (bytes, rest) = input.split_at(32);
        *input = rest;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| StakingError::TruncatedPayload)?;
        Ok(Pubkey::new_from_array(bytes))
    }
}

// 4. mod client (instruction builders for off-chain callers)
pub mod client {
    use solana_program::{
        instruction::{AccountMeta, Instruction as SolInstruction},
        pubkey::Pubkey,
    };
    use crate::ix::Instruction;

    fn with_authority(program_id: &Pubkey, pool: &Pubkey, authority: &Pubkey, ix: Instruction) -> SolInstruction {
        SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*pool, false),
                AccountMeta::new(*authority, true),
            ],
            data: ix.pack(),
        }
    }

    fn pool_only(program_id: &Pubkey, pool: &Pubkey, ix: Instruction) -> SolInstruction {
        SolInstruction {
            program_id: *program_id,
            accounts: vec![AccountMeta::new(*pool, false)],
            data: ix.pack(),
        }
    }

    pub fn deposit_and_mint(program_id: &Pubkey, pool: &Pubkey, authority: &Pubkey, amount: u64) -> SolInstruction {
        with_authority(program_id, pool, authority, Instruction::DepositAndMint { amount })
    }

    pub fn withdraw(program_id: &Pubkey, pool: &Pubkey, authority: &Pubkey, amount: u64) -> SolInstruction {
        with_authority(program_id, pool, authority, Instruction::Withdraw { amount })
    }

    pub fn compound_rewards(program_id: &Pubkey, pool: &Pubkey) -> SolInstruction {
        pool_only(program_id, pool, Instruction::CompoundRewards)
    }

    pub fn emergency_unstake(program_id: &Pubkey, pool: &Pubkey, authority: &Pubkey, amount: u64) -> SolInstruction {
        with_authority(program_id, pool, authority, Instruction::EmergencyUnstake { amount })
    }

    pub fn distribute_rewards(program_id: &Pubkey, pool: &Pubkey) -> SolInstruction {
        pool_only(program_id, pool, Instruction::DistributeRewards)
    }

    pub fn create_referral(program_id: &Pubkey, pool: &Pubkey, authority: &Pubkey, referrer: &Pubkey) -> SolInstruction {
        with_authority(program_id, pool, authority, Instruction::CreateReferral { referrer: *referrer })
    }

    pub fn vote_on_proposal(
        program_id: &Pubkey,
        pool: &Pubkey,
        voter: &Pubkey,
        proposal_id: u64,
        vote: bool,
    ) -> SolInstruction {
        with_authority(program_id, pool, voter, Instruction::VoteOnProposal { proposal_id, vote })
    }

    pub fn create_proposal(program_id: &Pubkey, pool: &Pubkey, authority: &Pubkey, proposal_id: u64) -> SolInstruction {
        with_authority(program_id, pool, authority, Instruction::CreateProposal { proposal_id })
    }
}

// 5. mod accounts
pub mod accounts {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};
    use crate::{error::StakingError, ix::Opcode};

    /// Positional bindings: accounts[0] is the pool, accounts[1] the signing authority.
    pub struct PoolAccounts<'a, 'b> {
        pub pool: &'b AccountInfo<'a>,
        pub authority: Option<&'b AccountInfo<'a>>,
    }

    impl PoolAccounts<'_, '_> {
        pub fn authority_key(&self) -> Result<[u8; 32], ProgramError> {
            let authority = self.authority.ok_or(StakingError::MissingSigner)?;
            Ok(authority.key.to_bytes())
        }
    }

    pub fn expect_len(accounts: &[AccountInfo], n: usize) -> Result<(), ProgramError> {
        if accounts.len() != n {
            return Err(StakingError::AccountCountMismatch.into());
        }
        Ok(())
    }

    pub fn expect_signer(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_signer {
            return Err(StakingError::MissingSigner.into());
        }
        Ok(())
    }

    pub fn expect_writable(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_writable {
            return Err(StakingError::PoolNotWritable.into());
        }
        Ok(())
    }

    pub fn expect_owner(ai: &AccountInfo, owner: &Pubkey) -> Result<(), ProgramError> {
        if ai.owner != owner {
            return Err(ProgramError::IllegalOwner);
        }
        Ok(())
    }

    pub fn bind<'a, 'b>(
        program_id: &Pubkey,
        opcode: Opcode,
        accounts: &'b [AccountInfo<'a>],
    ) -> Result<PoolAccounts<'a, 'b>, ProgramError> {
        expect_len(accounts, opcode.account_count())?;
        let a_pool = &accounts[0];

        let a_authority = if opcode.requires_authority() {
            let a_authority = &accounts[1];
            expect_signer(a_authority)?;
            Some(a_authority)
        } else {
            None
        };

        expect_writable(a_pool)?;
        expect_owner(a_pool, program_id)?;

        Ok(PoolAccounts { pool: a_pool, authority: a_authority })
    }
}

// 6. mod state
pub mod state {
    use arrayref::{array_refs, mut_array_refs};
    use bytemuck::{Pod, Zeroable};
    use core::cell::RefMut;
    use core::mem::size_of;
    use solana_program::{account_info::AccountInfo, program_error::ProgramError};
    use crate::{constants::STAKING_POOL_LEN, error::StakingError};

    /// The 49-byte pool record. Field order and widths are the on-chain layout.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct StakingPool {
        pub is_initialized: bool,
        pub total_staked: u64,
        pub total_issued_tokens: u64,
        pub accumulated_fees: u64,
        pub total_compounded_rewards: u64,
        pub emergency_unstake_penalties: u64,
        pub reward_checkpoint: u64,
    }

    impl StakingPool {
        pub const LEN: usize = STAKING_POOL_LEN;

        pub fn unpack(src: &[u8]) -> Result<Self, StakingError> {
            let src: &[u8; STAKING_POOL_LEN] =
                src.try_into().map_err(|_| StakingError::MalformedAccount)?;
            let (
                is_initialized,
                total_staked,
                total_issued_tokens,
                accumulated_fees,
                total_compounded_rewards,
                emergency_unstake_penalties,
                reward_checkpoint,
            ) = array_refs![src, 1, 8, 8, 8, 8, 8, 8];

            let is_initialized = match is_initialized {
                [0] => false,
                [1] => true,
                _ => return Err(StakingError::MalformedAccount),
            };

            Ok(Self {
                is_initialized,
                total_staked: u64::from_le_bytes(*total_staked),
                total_issued_tokens: u64::from_le_bytes(*total_issued_tokens),
                accumulated_fees: u64::from_le_bytes(*accumulated_fees),
                total_compounded_rewards: u64::from_le_bytes(*total_compounded_rewards),
                emergency_unstake_penalties: u64::from_le_bytes(*emergency_unstake_penalties),
                reward_checkpoint: u64::from_le_bytes(*reward_checkpoint),
            })
        }

        pub fn pack_into(&self, dst: &mut [u8]) -> Result<(), StakingError> {
            let dst: &mut [u8; STAKING_POOL_LEN] =
                dst.try_into().map_err(|_| StakingError::MalformedAccount)?;
            self.write_fields(dst);
            Ok(())
        }

        pub fn pack(&self) -> [u8; STAKING_POOL_LEN] {
            let mut buf = [0u8; STAKING_POOL_LEN];
            self.write_fields(&mut buf);
            buf
        }

        fn write_fields(&self, dst: &mut [u8; STAKING_POOL_LEN]) {
            let (
                is_initialized_dst,
                total_staked_dst,
                total_issued_tokens_dst,
                accumulated_fees_dst,
                total_compounded_rewards_dst,
                emergency_unstake_penalties_dst,
                reward_checkpoint_dst,
            ) = mut_array_refs![dst, 1, 8, 8, 8, 8, 8, 8];

            is_initialized_dst[0] = self.is_initialized as u8;
            *total_staked_dst = self.total_staked.to_le_bytes();
            *total_issued_tokens_dst = self.total_issued_tokens.to_le_bytes();
            *accumulated_fees_dst = self.accumulated_fees.to_le_bytes();
            *total_compounded_rewards_dst = self.total_compounded_rewards.to_le_bytes();
            *emergency_unstake_penalties_dst = self.emergency_unstake_penalties.to_le_bytes();
            *reward_checkpoint_dst = self.reward_checkpoint.to_le_bytes();
        }
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Pod, Zeroable)]
    pub struct RegistryHeader {
        /// Signer of the initializing deposit; creates proposals.
        pub authority: [u8; 32],
        pub policy_version: u32,
        pub referral_count: u32,
        pub proposal_count: u32,
        pub vote_count: u32,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Pod, Zeroable)]
    pub struct ReferralRecord {
        pub referrer: [u8; 32],
        pub credit: u64,
        pub last_checkpoint: u64,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Pod, Zeroable)]
    pub struct ProposalRecord {
        pub proposal_id: u64,
        pub yes_votes: u64,
        pub no_votes: u64,
        pub proposer: [u8; 32],
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Pod, Zeroable)]
    pub struct VoteReceipt {
        pub voter: [u8; 32],
        pub proposal_id: u64,
    }

    pub fn pool_data_mut<'a, 'b>(ai: &'b AccountInfo<'a>) -> Result<RefMut<'b, &'a mut [u8]>, ProgramError> {
        Ok(ai.try_borrow_mut_data()?)
    }

    pub fn read_record<T: Pod>(data: &[u8], off: usize) -> T {
        let mut r = T::zeroed();
        let src = &data[off..off + size_of::<T>()];
        let dst = bytemuck::bytes_of_mut(&mut r);
        dst.copy_from_slice(src);
        r
    }

    pub fn write_record<T: Pod>(data: &mut [u8], off: usize, r: &T) {
        let src = bytemuck::bytes_of(r);
        let dst = &mut data[off..off + size_of::<T>()];
        dst.copy_from_slice(src);
    }
}

// 7. mod registry
pub mod registry {
    use crate::{
        constants::{
            MAX_PROPOSALS, MAX_REFERRALS, MAX_VOTE_RECEIPTS, PROPOSALS_OFF, PROPOSAL_LEN,
            REFERRALS_OFF, REFERRAL_LEN, REGISTRY_LEN, VOTES_OFF, VOTE_RECEIPT_LEN,
        },
        error::StakingError,
        state::{self, ProposalRecord, ReferralRecord, RegistryHeader, VoteReceipt},
    };

    /// Fixed-capacity side-record tables stored after the pool core.
    ///
    /// Tables are append-only; entries `0..count` are live. Every mutating
    /// method checks all of its preconditions before the first write.
    pub struct Registry<'d> {
        data: &'d mut [u8],
    }

    impl<'d> Registry<'d> {
        pub fn new(data: &'d mut [u8]) -> Result<Self, StakingError> {
            if data.len() != REGISTRY_LEN {
                return Err(StakingError::MalformedAccount);
            }
            let registry = Self { data };
            let h = registry.header();
            if h.referral_count as usize > MAX_REFERRALS
                || h.proposal_count as usize > MAX_PROPOSALS
                || h.vote_count as usize > MAX_VOTE_RECEIPTS
            {
                return Err(StakingError::MalformedAccount);
            }
            Ok(registry)
        }

        pub fn header(&self) -> RegistryHeader {
            state::read_record(&*self.data, 0)
        }

        fn write_header(&mut self, h: &RegistryHeader) {
            state::write_record(self.data, 0, h);
        }

        pub fn referral(&self, idx: usize) -> ReferralRecord {
            state::read_record(&*self.data, REFERRALS_OFF + idx * REFERRAL_LEN)
        }

        pub fn proposal(&self, idx: usize) -> ProposalRecord {
            state::read_record(&*self.data, PROPOSALS_OFF + idx * PROPOSAL_LEN)
        }

        pub fn vote_receipt(&self, idx: usize) -> VoteReceipt {
            state::read_record(&*self.data, VOTES_OFF + idx * VOTE_RECEIPT_LEN)
        }

        pub fn find_referral(&self, referrer: &[u8; 32]) -> Option<usize> {
            let count = self.header().referral_count as usize;
            (0..count).find(|&i| self.referral(i).referrer == *referrer)
        }

        pub fn find_proposal(&self, proposal_id: u64) -> Option<usize> {
            let count = self.header().proposal_count as usize;
            (0..count).find(|&i| self.proposal(i).proposal_id == proposal_id)
        }

        pub fn has_voted(&self, voter: &[u8; 32], proposal_id: u64) -> bool {
            let count = self.header().vote_count as usize;
            (0..count).any(|i| {
                let r = self.vote_receipt(i);
                r.proposal_id == proposal_id && r.voter == *voter
            })
        }

        pub fn initialize(&mut self, authority: [u8; 32], policy_version: u32) {
            let mut h = self.header();
            h.authority = authority;
            h.policy_version = policy_version;
            self.write_header(&h);
        }

        pub fn create_referral(&mut self, referrer: [u8; 32], checkpoint: u64) -> Result<usize, StakingError> {
            if referrer == [0u8; 32] {
                return Err(StakingError::InvalidReferrer);
            }
            if self.find_referral(&referrer).is_some() {
                return Err(StakingError::DuplicateReferral);
            }
            let mut h = self.header();
            let idx = h.referral_count as usize;
            if idx >= MAX_REFERRALS {
                return Err(StakingError::RegistryFull);
            }

            let record = ReferralRecord { referrer, credit: 0, last_checkpoint: checkpoint };
            state::write_record(self.data, REFERRALS_OFF + idx * REFERRAL_LEN, &record);
            h.referral_count += 1;
            self.write_header(&h);
            Ok(idx)
        }

        pub fn create_proposal(&mut self, proposal_id: u64, proposer: [u8; 32]) -> Result<usize, StakingError> {
            let mut h = self.header();
            if proposer != h.authority {
                return Err(StakingError::Unauthorized);
            }
            if self.find_proposal(proposal_id).is_some() {
                return Err(StakingError::DuplicateProposal);
            }
            let idx = h.proposal_count as usize;
            if idx >= MAX_PROPOSALS {
                return Err(StakingError::RegistryFull);
            }

            let record = ProposalRecord { proposal_id, yes_votes: 0, no_votes: 0, proposer };
            state::write_record(self.data, PROPOSALS_OFF + idx * PROPOSAL_LEN, &record);
            h.proposal_count += 1;
            self.write_header(&h);
            Ok(idx)
        }

        pub fn cast_vote(&mut self, voter: [u8; 32], proposal_id: u64, vote: bool) -> Result<ProposalRecord, StakingError> {
            let idx = self.find_proposal(proposal_id).ok_or(StakingError::UnknownProposal)?;
            if self.has_voted(&voter, proposal_id) {
                return Err(StakingError::DuplicateVote);
            }
            let mut h = self.header();
            let receipt_idx = h.vote_count as usize;
            if receipt_idx >= MAX_VOTE_RECEIPTS {
                return Err(StakingError::RegistryFull);
            }

            let mut proposal = self.proposal(idx);
            if vote {
                proposal.yes_votes = proposal.yes_votes.checked_add(1).ok_or(StakingError::ArithmeticOverflow)?;
            } else {
                proposal.no_votes = proposal.no_votes.checked_add(1).ok_or(StakingError::ArithmeticOverflow)?;
            }

            state::write_record(self.data, PROPOSALS_OFF + idx * PROPOSAL_LEN, &proposal);
            let receipt = VoteReceipt { voter, proposal_id };
            state::write_record(self.data, VOTES_OFF + receipt_idx * VOTE_RECEIPT_LEN, &receipt);
            h.vote_count += 1;
            self.write_header(&h);
            Ok(proposal)
        }

        /// Adds `share` to every referral's credit and stamps `checkpoint`.
        pub fn credit_referrals(&mut self, share: u64, checkpoint: u64) -> Result<(), StakingError> {
            let count = self.header().referral_count as usize;
            let mut credited = Vec::with_capacity(count);
            for idx in 0..count {
                let mut r = self.referral(idx);
                r.credit = r.credit.checked_add(share).ok_or(StakingError::ArithmeticOverflow)?;
                r.last_checkpoint = checkpoint;
                credited.push(r);
            }
            for (idx, r) in credited.iter().enumerate() {
                state::write_record(self.data, REFERRALS_OFF + idx * REFERRAL_LEN, r);
            }
            Ok(())
        }
    }
}

// 8. mod policy
pub mod policy {
    use crate::{error::StakingError, state::StakingPool};

    pub const BPS_DENOM: u64 = 10_000;

    /// Version stamped into the registry when a pool is initialized.
    pub const CURRENT_POLICY_VERSION: u32 = 1;

    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct CompoundQuote {
        pub gross: u64,
        pub fee: u64,
        pub net: u64,
    }

    pub trait RewardPolicy {
        fn version(&self) -> u32;

        /// Reward for one compounding step. `net` must be positive whenever
        /// the pool has stake.
        fn compound_quote(&self, pool: &StakingPool) -> Result<CompoundQuote, StakingError>;

        /// Penalty withheld from an emergency unstake of `amount`; within `1..=amount` for `amount > 0`.
        fn emergency_penalty(&self, amount: u64) -> Result<u64, StakingError>;

        /// Fee withheld from a regular withdrawal of `amount`; never exceeds `amount`.
        fn withdrawal_fee(&self, amount: u64) -> Result<u64, StakingError>;

        /// Credit each referral earns in one distribution.
        fn referral_share(&self, pool: &StakingPool, referral_count: u32) -> Result<u64, StakingError>;
    }

    /// 0.5% per compound with a 10% protocol cut, 1% withdrawal fee, 5%
    /// emergency penalty, 0.05% of stake shared across referrals per distribution.
    pub struct PolicyV1;

    impl PolicyV1 {
        pub const COMPOUND_RATE_BPS: u64 = 50;
        pub const PROTOCOL_FEE_BPS: u64 = 1_000;
        pub const WITHDRAWAL_FEE_BPS: u64 = 100;
        pub const EMERGENCY_PENALTY_BPS: u64 = 500;
        pub const REFERRAL_RATE_BPS: u64 = 5;
    }

    impl RewardPolicy for PolicyV1 {
        fn version(&self) -> u32 {
            1
        }

        fn compound_quote(&self, pool: &StakingPool) -> Result<CompoundQuote, StakingError> {
            if pool.total_staked == 0 {
                return Ok(CompoundQuote::default());
            }
            let gross = bps_of(pool.total_staked, Self::COMPOUND_RATE_BPS)?.max(1);
            let fee = bps_of(gross, Self::PROTOCOL_FEE_BPS)?;
            let net = gross.checked_sub(fee).ok_or(StakingError::ArithmeticUnderflow)?;
            Ok(CompoundQuote { gross, fee, net })
        }

        fn emergency_penalty(&self, amount: u64) -> Result<u64, StakingError> {
            if amount == 0 {
                return Ok(0);
            }
            Ok(bps_of(amount, Self::EMERGENCY_PENALTY_BPS)?.max(1).min(amount))
        }

        fn withdrawal_fee(&self, amount: u64) -> Result<u64, StakingError> {
            bps_of(amount, Self::WITHDRAWAL_FEE_BPS)
        }

        fn referral_share(&self, pool: &StakingPool, referral_count: u32) -> Result<u64, StakingError> {
            if referral_count == 0 {
                return Ok(0);
            }
            let bonus = bps_of(pool.total_staked, Self::REFERRAL_RATE_BPS)?;
            Ok(bonus / referral_count as u64)
        }
    }

    static POLICY_V1: PolicyV1 = PolicyV1;

    pub fn for_version(version: u32) -> Result<&'static dyn RewardPolicy, StakingError> {
        match version {
            1 => Ok(&POLICY_V1),
            _ => Err(StakingError::UnsupportedPolicy),
        }
    }

    /// floor(amount * bps / 10_000), widened to u128.
    pub fn bps_of(amount: u64, bps: u64) -> Result<u64, StakingError> {
        let v = (amount as u128) * (bps as u128) / (BPS_DENOM as u128);
        u64::try_from(v).map_err(|_| StakingError::ArithmeticOverflow)
    }
}

// 9. mod ledger
pub mod ledger {
    use crate::{
        error::StakingError,
        policy::{CompoundQuote, RewardPolicy},
        state::StakingPool,
    };

    // Transitions either fully apply to `pool` or return an error with `pool` untouched.
    // Every success keeps total_issued_tokens == total_staked.

    pub fn require_initialized(pool: &StakingPool) -> Result<(), StakingError> {
        if !pool.is_initialized {
            return Err(StakingError::PoolNotInitialized);
        }
        Ok(())
    }

    pub fn deposit_and_mint(pool: &mut StakingPool, amount: u64) -> Result<(), StakingError> {
        if amount == 0 {
            return Err(StakingError::InvalidAmount);
        }
        let total_staked = pool.total_staked.checked_add(amount).ok_or(StakingError::ArithmeticOverflow)?;
        let total_issued_tokens = pool
            .total_issued_tokens
            .checked_add(amount)
            .ok_or(StakingError::ArithmeticOverflow)?;

        pool.is_initialized = true;
        pool.total_staked = total_staked;
        pool.total_issued_tokens = total_issued_tokens;
        Ok(())
    }

    fn burn(pool: &StakingPool, amount: u64) -> Result<(u64, u64), StakingError> {
        if amount == 0 || amount > pool.total_staked {
            return Err(StakingError::InsufficientFunds);
        }
        let total_staked = pool.total_staked.checked_sub(amount).ok_or(StakingError::ArithmeticUnderflow)?;
        let total_issued_tokens = pool
            .total_issued_tokens
            .checked_sub(amount)
            .ok_or(StakingError::ArithmeticUnderflow)?;
        Ok((total_staked, total_issued_tokens))
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Withdrawal {
        pub fee: u64,
        /// Owed to the caller; settled outside the pool record.
        pub payout: u64,
    }

    pub fn withdraw(pool: &mut StakingPool, amount: u64, policy: &dyn RewardPolicy) -> Result<Withdrawal, StakingError> {
        let (total_staked, total_issued_tokens) = burn(pool, amount)?;
        let fee = policy.withdrawal_fee(amount)?;
        let payout = amount.checked_sub(fee).ok_or(StakingError::ArithmeticUnderflow)?;
        let accumulated_fees = pool.accumulated_fees.checked_add(fee).ok_or(StakingError::ArithmeticOverflow)?;

        pool.total_staked = total_staked;
        pool.total_issued_tokens = total_issued_tokens;
        pool.accumulated_fees = accumulated_fees;
        Ok(Withdrawal { fee, payout })
    }

    pub fn compound_rewards(pool: &mut StakingPool, policy: &dyn RewardPolicy) -> Result<CompoundQuote, StakingError> {
        let quote = policy.compound_quote(pool)?;
        if quote.net == 0 {
            return Err(StakingError::NothingToCompound);
        }
        let total_staked = pool.total_staked.checked_add(quote.net).ok_or(StakingError::ArithmeticOverflow)?;
        let total_issued_tokens = pool
            .total_issued_tokens
            .checked_add(quote.net)
            .ok_or(StakingError::ArithmeticOverflow)?;
        let total_compounded_rewards = pool
            .total_compounded_rewards
            .checked_add(quote.net)
            .ok_or(StakingError::ArithmeticOverflow)?;
        let accumulated_fees = pool.accumulated_fees.checked_add(quote.fee).ok_or(StakingError::ArithmeticOverflow)?;

        pool.total_staked = total_staked;
        pool.total_issued_tokens = total_issued_tokens;
        pool.total_compounded_rewards = total_compounded_rewards;
        pool.accumulated_fees = accumulated_fees;
        Ok(quote)
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Unstake {
        pub penalty: u64,
        /// Owed to the caller; settled outside the pool record.
        pub payout: u64,
    }

    pub fn emergency_unstake(pool: &mut StakingPool, amount: u64, policy: &dyn RewardPolicy) -> Result<Unstake, StakingError> {
        let (total_staked, total_issued_tokens) = burn(pool, amount)?;
        let penalty = policy.emergency_penalty(amount)?;
        let payout = amount.checked_sub(penalty).ok_or(StakingError::ArithmeticUnderflow)?;
        let emergency_unstake_penalties = pool
            .emergency_unstake_penalties
            .checked_add(penalty)
            .ok_or(StakingError::ArithmeticOverflow)?;

        pool.total_staked = total_staked;
        pool.total_issued_tokens = total_issued_tokens;
        pool.emergency_unstake_penalties = emergency_unstake_penalties;
        Ok(Unstake { penalty, payout })
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Distribution {
        pub checkpoint: u64,
        pub referral_share: u64,
    }

    pub fn distribute_rewards(
        pool: &mut StakingPool,
        policy: &dyn RewardPolicy,
        referral_count: u32,
    ) -> Result<Distribution, StakingError> {
        let checkpoint = pool.reward_checkpoint.checked_add(1).ok_or(StakingError::ArithmeticOverflow)?;
        let referral_share = policy.referral_share(pool, referral_count)?;

        pool.reward_checkpoint = checkpoint;
        Ok(Distribution { checkpoint, referral_share })
    }
}

// 10. mod processor
pub mod processor {
    use solana_program::{
        account_info::AccountInfo, entrypoint::ProgramResult, log::sol_log_64, msg, pubkey::Pubkey,
    };
    #[cfg(feature = "cu-audit")]
    use solana_program::log::sol_log_compute_units;
    use crate::{
        accounts,
        constants::{POOL_ACCOUNT_LEN, REGISTRY_OFF, STAKING_POOL_LEN},
        error::StakingError,
        ix::Instruction,
        ledger, policy,
        registry::Registry,
        state::{self, StakingPool},
    };

    fn pool_guard(data: &[u8]) -> Result<(), StakingError> {
        if data.len() != POOL_ACCOUNT_LEN {
            return Err(StakingError::MalformedAccount);
        }
        Ok(())
    }

    fn log_pool(pool: &StakingPool) {
        msg!("POOL_STATE");
        sol_log_64(
            pool.total_staked,
            pool.total_issued_tokens,
            pool.accumulated_fees,
            pool.total_compounded_rewards,
            pool.emergency_unstake_penalties,
        );
    }

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        let instruction = Instruction::decode(instruction_data)?;
        let bound = accounts::bind(program_id, instruction.opcode(), accounts)?;

        #[cfg(feature = "cu-audit")]
        {
            msg!("CU_CHECKPOINT: decode_end");
            sol_log_compute_units();
        }

        let mut data = state::pool_data_mut(bound.pool)?;
        pool_guard(&data)?;
        let (core, tail) = data.split_at_mut(REGISTRY_OFF);
        let core = &mut core[..STAKING_POOL_LEN];

        // Transitions run on a copy; `core` is only rewritten on success.
        let mut pool = StakingPool::unpack(core)?;
        let mut registry = Registry::new(tail)?;

        match instruction {
            Instruction::DepositAndMint { amount } => {
                msg!("Instruction: Deposit and Mint");
                let authority = bound.authority_key()?;
                let fresh = !pool.is_initialized;
                ledger::deposit_and_mint(&mut pool, amount)?;
                if fresh {
                    registry.initialize(authority, policy::CURRENT_POLICY_VERSION);
                    msg!("Pool initialized, policy v{}", policy::CURRENT_POLICY_VERSION);
                }
            },
            Instruction::Withdraw { amount } => {
                msg!("Instruction: Withdraw");
                ledger::require_initialized(&pool)?;
                let policy = policy::for_version(registry.header().policy_version)?;
                let withdrawal = ledger::withdraw(&mut pool, amount, policy)?;
                msg!("Withdrawal fee {}, payout {}", withdrawal.fee, withdrawal.payout);
            },
            Instruction::CompoundRewards => {
                msg!("Instruction: Compound Rewards");
                ledger::require_initialized(&pool)?;
                let policy = policy::for_version(registry.header().policy_version)?;
                let quote = ledger::compound_rewards(&mut pool, policy)?;
                msg!("Compounded {} (gross {}, fee {})", quote.net, quote.gross, quote.fee);
            },
            Instruction::EmergencyUnstake { amount } => {
                msg!("Instruction: Emergency Unstake");
                ledger::require_initialized(&pool)?;
                let policy = policy::for_version(registry.header().policy_version)?;
                let unstake = ledger::emergency_unstake(&mut pool, amount, policy)?;
                msg!("Emergency unstake penalty {}, payout {}", unstake.penalty, unstake.payout);
            },
            Instruction::DistributeRewards => {
                msg!("Instruction: Distribute Rewards");
                ledger::require_initialized(&pool)?;
                let header = registry.header();
                let policy = policy::for_version(header.policy_version)?;
                let dist = ledger::distribute_rewards(&mut pool, policy, header.referral_count)?;
                registry.credit_referrals(dist.referral_share, dist.checkpoint)?;
                msg!("Checkpoint {}, referral share {}", dist.checkpoint, dist.referral_share);
            },
            Instruction::CreateReferral { referrer } => {
                msg!("Instruction: Create Referral");
                ledger::require_initialized(&pool)?;
                registry.create_referral(referrer.to_bytes(), pool.reward_checkpoint)?;
                msg!("Referral created for {}", referrer);
            },
            Instruction::VoteOnProposal { proposal_id, vote } => {
                msg!("Instruction: Vote on Proposal");
                ledger::require_initialized(&pool)?;
                let voter = bound.authority_key()?;
                let proposal = registry.cast_vote(voter, proposal_id, vote)?;
                msg!(
                    "Proposal {}: yes {}, no {}",
                    proposal_id,
                    proposal.yes_votes,
                    proposal.no_votes
                );
            },
            Instruction::CreateProposal { proposal_id } => {
                msg!("Instruction: Create Proposal");
                ledger::require_initialized(&pool)?;
                let proposer = bound.authority_key()?;
                registry.create_proposal(proposal_id, proposer)?;
                msg!("Proposal {} created", proposal_id);
            },
        }

        pool.pack_into(core)?;
        log_pool(&pool);

        #[cfg(feature = "cu-audit")]
        {
            msg!("CU_CHECKPOINT: commit_end");
            sol_log_compute_units();
        }
        Ok(())
    }
}

// 11. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
pub mod entrypoint {
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult,
        program_error::PrintProgramError, pubkey::Pubkey,
    };
    use crate::{error::StakingError, processor};

    entrypoint!(process_instruction);

    fn process_instruction<'a>(
        program_id: &Pubkey,
        accounts: &'a [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        if let Err(error) = processor::process_instruction(program_id, accounts, instruction_data) {
            error.print::<StakingError>();
            return Err(error);
        }
        Ok(())
    }
}
