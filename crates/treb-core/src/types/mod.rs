//! Registry record types shared across the crate.

pub mod deployment;
pub mod safe;
pub mod transaction;

pub use deployment::{
    ArtifactInfo, Deployment, DeploymentKind, DeploymentMethod, DeploymentStrategy, ProxyInfo,
    ProxyUpgrade, VerificationInfo, VerificationStatus, VerifierStatus,
};
pub use safe::{Confirmation, SafeBatchEntry, SafeTransaction, SafeTxStatus};
pub use transaction::{Operation, SafeContext, Transaction, TransactionStatus};

/// EVM chain identifier.
pub type ChainId = u64;

/// Canonical (lowercase) form of a hex address or hash, used for every
/// equality check and index key.
pub fn normalize_hex(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// True if `value` looks like a 20-byte hex address (`0x` + 40 hex digits).
pub fn is_address(value: &str) -> bool {
    let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    else {
        return false;
    };
    hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Case-insensitive address comparison.
pub fn same_address(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
