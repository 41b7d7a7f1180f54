//! Credential authorization
//!
//! The authorized set is owned by the control loop. Runtime provisioning
//! arrives as `AclCommand`s and is applied between cycles, never during one.

use crate::domain::types::Credential;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Default)]
pub struct AuthorizedSet {
    uids: FxHashSet<Credential>,
}

impl AuthorizedSet {
    pub fn new(uids: impl IntoIterator<Item = Credential>) -> Self {
        Self { uids: uids.into_iter().collect() }
    }

    /// True iff `identifier` equals an authorized credential byte for byte
    ///
    /// A prefix or an extension of an authorized UID is a different UID.
    #[inline]
    pub fn authorize(&self, identifier: &[u8]) -> bool {
        self.uids.contains(&Credential::from_bytes(identifier))
    }

    /// Returns false if the credential was already present
    pub fn add(&mut self, uid: Credential) -> bool {
        self.uids.insert(uid)
    }

    /// Returns false if the credential was not present
    pub fn revoke(&mut self, uid: &Credential) -> bool {
        self.uids.remove(uid)
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    pub fn apply(&mut self, command: AclCommand) -> bool {
        let changed = match &command {
            AclCommand::Add(uid) => self.add(uid.clone()),
            AclCommand::Revoke(uid) => self.revoke(uid),
        };
        info!(op = %command.op(), uid = %command.uid(), changed = %changed, size = %self.len(), "acl_update");
        changed
    }
}

/// Runtime change to the authorized set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclCommand {
    Add(Credential),
    Revoke(Credential),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum AclOp {
    Add,
    Revoke,
}

#[derive(Deserialize)]
struct AclMessage {
    op: AclOp,
    uid: String,
}

impl AclCommand {
    /// Parse `{"op":"add"|"revoke","uid":"03:0C:49:16"}`
    pub fn from_json(payload: &[u8]) -> anyhow::Result<Self> {
        let message: AclMessage = serde_json::from_slice(payload)?;
        let uid = Credential::from_str(&message.uid)?;
        Ok(match message.op {
            AclOp::Add => AclCommand::Add(uid),
            AclOp::Revoke => AclCommand::Revoke(uid),
        })
    }

    pub fn op(&self) -> &'static str {
        match self {
            AclCommand::Add(_) => "add",
            AclCommand::Revoke(_) => "revoke",
        }
    }

    pub fn uid(&self) -> &Credential {
        match self {
            AclCommand::Add(uid) | AclCommand::Revoke(uid) => uid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN: [u8; 4] = [0x03, 0x0C, 0x49, 0x16];

    fn set() -> AuthorizedSet {
        AuthorizedSet::new([Credential::from_bytes(&KNOWN)])
    }

    #[test]
    fn test_exact_match_authorizes() {
        assert!(set().authorize(&KNOWN));
    }

    #[test]
    fn test_single_byte_difference_rejected() {
        let s = set();
        for i in 0..KNOWN.len() {
            let mut uid = KNOWN;
            uid[i] ^= 0x01;
            assert!(!s.authorize(&uid), "byte {} flipped", i);
        }
    }

    #[test]
    fn test_prefix_and_extension_rejected() {
        let s = set();
        assert!(!s.authorize(&KNOWN[..3]));
        assert!(!s.authorize(&[0x03, 0x0C, 0x49, 0x16, 0x00, 0x00, 0x00]));
        assert!(!s.authorize(&[]));
    }

    #[test]
    fn test_order_sensitive() {
        assert!(!set().authorize(&[0x16, 0x49, 0x0C, 0x03]));
    }

    #[test]
    fn test_authorize_does_not_mutate() {
        let s = set();
        let _ = s.authorize(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let _ = s.authorize(&KNOWN);
        assert_eq!(s.len(), 1);
        assert!(s.authorize(&KNOWN));
    }

    #[test]
    fn test_empty_set_rejects_everything() {
        let s = AuthorizedSet::default();
        assert!(s.is_empty());
        assert!(!s.authorize(&KNOWN));
    }

    #[test]
    fn test_apply_add_and_revoke() {
        let mut s = set();
        let other = Credential::from_bytes(&[0x04, 0xA1, 0x22, 0x3B, 0x5C, 0x6D, 0x80]);

        assert!(s.apply(AclCommand::Add(other.clone())));
        assert!(s.authorize(other.as_bytes()));
        assert!(!s.apply(AclCommand::Add(other.clone())));

        assert!(s.apply(AclCommand::Revoke(Credential::from_bytes(&KNOWN))));
        assert!(!s.authorize(&KNOWN));
        assert!(!s.apply(AclCommand::Revoke(Credential::from_bytes(&KNOWN))));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_acl_command_from_json() {
        let cmd = AclCommand::from_json(br#"{"op":"add","uid":"03:0C:49:16"}"#).unwrap();
        assert_eq!(cmd, AclCommand::Add(Credential::from_bytes(&KNOWN)));

        let cmd = AclCommand::from_json(br#"{"op":"revoke","uid":"030c4916"}"#).unwrap();
        assert_eq!(cmd, AclCommand::Revoke(Credential::from_bytes(&KNOWN)));
    }

    #[test]
    fn test_acl_command_rejects_bad_input() {
        assert!(AclCommand::from_json(br#"{"op":"grant","uid":"03:0C:49:16"}"#).is_err());
        assert!(AclCommand::from_json(br#"{"op":"add","uid":"03:0C:49"}"#).is_err());
        assert!(AclCommand::from_json(b"not json").is_err());
    }
}
