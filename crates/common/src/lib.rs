//! Contains core types shared by the quarry crates.
//!
//! This includes trivial wrappers around the chain's identifiers which
//! help by providing additional type safety, and the three document types
//! the pipeline produces.

mod block;
mod contract;
mod macros;
mod transaction;

pub mod consts;
pub mod hex;

pub use block::Block;
pub use contract::Contract;
pub use transaction::Transaction;

/// A block height.
#[derive(Copy, Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockNumber(u64);

macros::i64_backed_u64::new_get_partialeq!(BlockNumber);
macros::i64_backed_u64::serdes!(BlockNumber);

impl BlockNumber {
    pub const GENESIS: BlockNumber = BlockNumber::new_or_panic(0);
    /// The maximum [BlockNumber] we can support. Restricted to
    /// `u64::MAX/2` to match the store's signed 64-bit integers.
    pub const MAX: BlockNumber = BlockNumber::new_or_panic(i64::MAX as u64);

    /// Returns the parent's [BlockNumber] or [None] if the current number
    /// is genesis.
    pub fn parent(&self) -> Option<Self> {
        if self == &Self::GENESIS {
            None
        } else {
            Some(*self - 1)
        }
    }
}

impl std::ops::Add<u64> for BlockNumber {
    type Output = BlockNumber;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::ops::Sub<u64> for BlockNumber {
    type Output = BlockNumber;

    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl std::fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// The timestamp of a block, in unix seconds.
#[derive(Copy, Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockTimestamp(u64);

macros::i64_backed_u64::new_get_partialeq!(BlockTimestamp);
macros::i64_backed_u64::serdes!(BlockTimestamp);

impl std::fmt::Display for BlockTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

macros::hex_str_wrapper!(
    /// Hash of a canonical or uncle block. Globally unique across both.
    BlockHash
);

macros::hex_str_wrapper!(
    /// Hash of a transaction.
    TransactionHash
);

macros::hex_str_wrapper!(
    /// Address of a deployed contract.
    ContractAddress
);

macros::hex_str_wrapper!(
    /// Address of a transaction sender or recipient.
    AccountAddress
);
