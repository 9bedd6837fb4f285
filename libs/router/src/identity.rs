//! Node identity: login-token derivation and the bind-once identity slot.

use crate::{RouterError, RouterResult};
use fabric_types::NodeId;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Tag prepended to the derived login token so the server knows which
/// derivation the client applied.
pub const LOGIN_TOKEN_PREFIX: &str = "[10sha256]";

const DIGEST_ROUNDS: usize = 10;

/// Derive the login token sent with a connect request.
///
/// Applies SHA-256 ten times in sequence; each round's digest is
/// hex-encoded and the hex string's bytes feed the next round. The
/// credential itself never goes on the wire.
pub fn derive_login_token(credential: &str) -> String {
    let mut input = credential.as_bytes().to_vec();
    let mut hex_digest = String::new();

    for _ in 0..DIGEST_ROUNDS {
        let digest = Sha256::digest(&input);
        hex_digest = hex::encode(digest);
        input = hex_digest.clone().into_bytes();
    }

    format!("{}{}", LOGIN_TOKEN_PREFIX, hex_digest)
}

/// This node's identity slot.
///
/// Empty until the bind handshake completes, then holds the assigned
/// identity for the router's process lifetime. A restart requires a
/// fresh handshake, so the slot is written at most once; readers after
/// the write observe a stable value.
#[derive(Debug, Default)]
pub struct NodeIdentity {
    slot: RwLock<Option<NodeId>>,
}

impl NodeIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the server-assigned identity. Rejects empty identities and
    /// a second bind; both indicate a protocol bug upstream.
    pub fn bind(&self, nid: NodeId) -> RouterResult<()> {
        if nid.is_empty() {
            return Err(RouterError::Protocol(
                "assigned node identity is empty".to_string(),
            ));
        }

        let mut slot = self.slot.write();
        if slot.is_some() {
            return Err(RouterError::Protocol(
                "node identity is already bound".to_string(),
            ));
        }
        *slot = Some(nid);
        Ok(())
    }

    /// Read the bound identity. Reading before the bind handshake
    /// completes is a programming error in the caller and fails loudly.
    pub fn get(&self) -> RouterResult<NodeId> {
        self.slot.read().clone().ok_or(RouterError::IdentityUnbound)
    }

    pub fn is_bound(&self) -> bool {
        self.slot.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn token_is_deterministic() {
        let a = derive_login_token("secret");
        let b = derive_login_token("secret");
        assert_eq!(a, b);
    }

    #[test]
    fn token_has_prefix_and_hex_body() {
        let token = derive_login_token("secret");
        let body = token.strip_prefix(LOGIN_TOKEN_PREFIX).unwrap();
        assert_eq!(body.len(), 64);
        assert!(body.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_credentials_yield_distinct_tokens() {
        assert_ne!(derive_login_token("secret"), derive_login_token("secre7"));
        assert_ne!(derive_login_token(""), derive_login_token(" "));
    }

    proptest! {
        // Avalanche: any single-character edit to the credential moves
        // the final token.
        #[test]
        fn token_avalanche(cred in "[ -~]{1,32}", idx in 0usize..32, flip in 1u8..127) {
            let bytes = cred.as_bytes();
            let idx = idx % bytes.len();
            let mut mutated = bytes.to_vec();
            mutated[idx] ^= flip;
            prop_assume!(mutated[idx].is_ascii_graphic() || mutated[idx] == b' ');
            let mutated = String::from_utf8(mutated).unwrap();
            prop_assume!(mutated != cred);

            prop_assert_ne!(derive_login_token(&cred), derive_login_token(&mutated));
        }
    }

    #[test]
    fn identity_binds_once() {
        let identity = NodeIdentity::new();
        assert!(matches!(identity.get(), Err(RouterError::IdentityUnbound)));
        assert!(!identity.is_bound());

        identity.bind(NodeId::new("node-42")).unwrap();
        assert_eq!(identity.get().unwrap(), NodeId::new("node-42"));
        assert!(identity.is_bound());

        let err = identity.bind(NodeId::new("node-43")).unwrap_err();
        assert!(matches!(err, RouterError::Protocol(_)));
        assert_eq!(identity.get().unwrap(), NodeId::new("node-42"));
    }

    #[test]
    fn empty_identity_is_rejected() {
        let identity = NodeIdentity::new();
        assert!(matches!(
            identity.bind(NodeId::new("")),
            Err(RouterError::Protocol(_))
        ));
        assert!(!identity.is_bound());
    }
}
