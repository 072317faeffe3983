//! Signing boundary used by the envelope builder and the client operator.

use std::{fmt, sync::Arc};

use ed25519_dalek::{SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::identity::AccountId;

/// Ed25519 public key bytes identifying a signer.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Checks an ed25519 `signature` over `message` against this key.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
            return false;
        };
        key.verify(message, &signature).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Opaque signing capability: produces a signature over arbitrary bytes.
pub trait Signer: Send + Sync {
    /// Returns the key signatures are checked against.
    fn public_key(&self) -> PublicKey;

    /// Signs `message`.
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

impl Signer for SigningKey {
    fn public_key(&self) -> PublicKey {
        PublicKey(self.verifying_key().to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        ed25519_dalek::Signer::sign(self, message).to_bytes().to_vec()
    }
}

/// Borrowed signer reference wrapper.
#[derive(Clone, Copy)]
pub struct SignerRef<'signer> {
    /// Borrowed signer object.
    signer: &'signer dyn Signer,
}

impl<'signer> SignerRef<'signer> {
    /// Creates a signer reference wrapper.
    #[must_use]
    pub fn new(signer: &'signer dyn Signer) -> Self {
        Self { signer }
    }

    /// Returns the wrapped signer.
    #[must_use]
    pub fn as_signer(self) -> &'signer dyn Signer {
        self.signer
    }
}

impl fmt::Debug for SignerRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerRef")
            .field("public_key", &self.signer.public_key())
            .finish()
    }
}

/// Account that pays for requests by default, with the key that signs for it.
#[derive(Clone)]
pub struct Operator {
    /// Paying account.
    account_id: AccountId,
    /// Signer for the paying account.
    signer: Arc<dyn Signer>,
}

impl Operator {
    /// Creates an operator.
    #[must_use]
    pub fn new(account_id: AccountId, signer: Arc<dyn Signer>) -> Self {
        Self { account_id, signer }
    }

    /// Returns the paying account.
    #[must_use]
    pub const fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Returns the operator's public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.signer.public_key()
    }

    /// Borrows the operator's signer.
    #[must_use]
    pub fn signer(&self) -> SignerRef<'_> {
        SignerRef::new(self.signer.as_ref())
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("account_id", &self.account_id)
            .field("public_key", &self.public_key())
            .finish()
    }
}
