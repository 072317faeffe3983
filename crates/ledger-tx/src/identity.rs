//! Account, node, and logical-request identity types.

use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Nanoseconds in one second.
const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// How far generated valid-start timestamps are backdated to tolerate node clock skew.
const VALID_START_BACKDATE: Duration = Duration::from_secs(5);

/// Last generated valid-start, in nanoseconds since the unix epoch.
static LAST_GENERATED_NANOS: AtomicU64 = AtomicU64::new(0);

/// Identity parsing errors.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum IdentityError {
    /// Entity id was not `shard.realm.num`.
    #[error("invalid entity id `{input}`: expected `shard.realm.num`")]
    InvalidEntityId {
        /// Rejected input.
        input: String,
    },
    /// Transaction id was not `shard.realm.num@seconds.nanos`.
    #[error("invalid transaction id `{input}`: expected `shard.realm.num@seconds.nanos`")]
    InvalidTransactionId {
        /// Rejected input.
        input: String,
    },
}

/// Ledger account identifier in `shard.realm.num` form.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct AccountId {
    /// Shard number.
    pub shard: u64,
    /// Realm number.
    pub realm: u64,
    /// Account number within the realm.
    pub num: u64,
}

impl AccountId {
    /// Creates an account id.
    #[must_use]
    pub const fn new(shard: u64, realm: u64, num: u64) -> Self {
        Self { shard, realm, num }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl FromStr for AccountId {
    type Err = IdentityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentityError::InvalidEntityId {
            input: input.to_owned(),
        };
        let mut parts = input.split('.').map(str::parse::<u64>);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(shard)), Some(Ok(realm)), Some(Ok(num)), None) => {
                Ok(Self::new(shard, realm, num))
            }
            _ => Err(invalid()),
        }
    }
}

/// Identifier a node is addressed by.
///
/// Nodes are named by the account that receives their fees, so a node id is a thin wrapper
/// over [`AccountId`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId(pub AccountId);

impl NodeId {
    /// Creates a node id from its account number in shard/realm zero.
    #[must_use]
    pub const fn from_num(num: u64) -> Self {
        Self(AccountId::new(0, 0, num))
    }

    /// Returns the node's account id.
    #[must_use]
    pub const fn account_id(self) -> AccountId {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NodeId {
    type Err = IdentityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        input.parse().map(Self)
    }
}

/// Seconds/nanoseconds timestamp as carried on the wire.
#[derive(
    Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Whole seconds since the unix epoch.
    pub seconds: u64,
    /// Sub-second nanoseconds, always below one second.
    pub nanos: u32,
}

impl Timestamp {
    /// Creates a normalized timestamp.
    #[must_use]
    pub fn new(seconds: u64, nanos: u32) -> Self {
        Self::from_unix_nanos(
            seconds
                .saturating_mul(NANOS_PER_SECOND)
                .saturating_add(u64::from(nanos)),
        )
    }

    /// Builds a timestamp from nanoseconds since the unix epoch.
    #[must_use]
    pub fn from_unix_nanos(total: u64) -> Self {
        Self {
            seconds: total / NANOS_PER_SECOND,
            nanos: u32::try_from(total % NANOS_PER_SECOND).unwrap_or_default(),
        }
    }

    /// Returns nanoseconds since the unix epoch, saturating far in the future.
    #[must_use]
    pub fn as_unix_nanos(self) -> u64 {
        self.seconds
            .saturating_mul(NANOS_PER_SECOND)
            .saturating_add(u64::from(self.nanos))
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or_else(|_| Self::default(), Self::from_duration)
    }

    /// Returns this timestamp advanced by `nanos` nanoseconds.
    #[must_use]
    pub fn plus_nanos(self, nanos: u64) -> Self {
        Self::from_unix_nanos(self.as_unix_nanos().saturating_add(nanos))
    }

    /// Converts a duration since the epoch.
    fn from_duration(elapsed: Duration) -> Self {
        Self::from_unix_nanos(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

/// Identity of one logical request: the paying account plus its valid-start timestamp.
///
/// Every per-node envelope of a request carries the same transaction id, and nodes
/// deduplicate on it. Chunks of a large request each carry their own id derived from the
/// first chunk's id (see [`TransactionId::offset_nanos`]).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    /// Account paying for (and named by) the request.
    pub payer: AccountId,
    /// Earliest consensus time at which the request is valid.
    pub valid_start: Timestamp,
}

impl TransactionId {
    /// Creates a transaction id from explicit parts.
    #[must_use]
    pub const fn new(payer: AccountId, valid_start: Timestamp) -> Self {
        Self { payer, valid_start }
    }

    /// Generates a fresh transaction id for `payer`.
    ///
    /// The valid start is backdated a few seconds and is strictly increasing across every id
    /// generated in this process, so two ids generated back to back never collide.
    #[must_use]
    pub fn generate(payer: AccountId) -> Self {
        let wall = Timestamp::now()
            .as_unix_nanos()
            .saturating_sub(u64::try_from(VALID_START_BACKDATE.as_nanos()).unwrap_or(0));
        let mut next = wall;
        let _ = LAST_GENERATED_NANOS.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            next = wall.max(last.saturating_add(1));
            Some(next)
        });
        Self::new(payer, Timestamp::from_unix_nanos(next))
    }

    /// Returns an id with the same payer whose valid start is `nanos` later.
    ///
    /// Used to derive per-chunk identities: offsets are strictly monotonic, so derived ids sort
    /// in submission order.
    #[must_use]
    pub fn offset_nanos(self, nanos: u64) -> Self {
        Self::new(self.payer, self.valid_start.plus_nanos(nanos))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.payer, self.valid_start)
    }
}

impl FromStr for TransactionId {
    type Err = IdentityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentityError::InvalidTransactionId {
            input: input.to_owned(),
        };
        let (payer, valid_start) = input.split_once('@').ok_or_else(invalid)?;
        let payer = payer.parse::<AccountId>().map_err(|_| invalid())?;
        let (seconds, nanos) = valid_start.split_once('.').ok_or_else(invalid)?;
        let seconds = seconds.parse::<u64>().map_err(|_| invalid())?;
        let nanos = nanos.parse::<u32>().map_err(|_| invalid())?;
        if u64::from(nanos) >= NANOS_PER_SECOND {
            return Err(invalid());
        }
        Ok(Self::new(payer, Timestamp { seconds, nanos }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_and_transaction_ids_parse_their_display_form() {
        let id = TransactionId::new(AccountId::new(0, 0, 1001), Timestamp::new(1_700_000_000, 42));
        assert_eq!(id.to_string(), "0.0.1001@1700000000.000000042");
        assert_eq!(id.to_string().parse::<TransactionId>(), Ok(id));
        assert_eq!("0.0.3".parse::<NodeId>(), Ok(NodeId::from_num(3)));
        assert!("0.0".parse::<AccountId>().is_err());
        assert!("0.0.3@12".parse::<TransactionId>().is_err());
    }

    #[test]
    fn offset_carries_into_seconds() {
        let base = TransactionId::new(AccountId::new(0, 0, 2), Timestamp::new(10, 999_999_999));
        let next = base.offset_nanos(1);
        assert_eq!(next.valid_start, Timestamp::new(11, 0));
        assert!(base < next);
    }

    #[test]
    fn generated_ids_strictly_increase() {
        let payer = AccountId::new(0, 0, 7);
        let first = TransactionId::generate(payer);
        let second = TransactionId::generate(payer);
        assert!(first.valid_start < second.valid_start);
        assert!(first.valid_start < Timestamp::now());
    }
}
