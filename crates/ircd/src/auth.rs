//! Credential stores: the server password, the operator table and the SASL
//! account store. All hashes are bcrypt; verification reports one generic
//! mismatch error regardless of what went wrong.

use std::collections::HashMap;

use crate::errors::AuthError;
use crate::names::fold;

/// Compare a bcrypt hash against a plaintext candidate.
pub fn compare_password(hash: &str, plaintext: &str) -> Result<(), AuthError> {
    match bcrypt::verify(plaintext, hash) {
        Ok(true) => Ok(()),
        _ => Err(AuthError),
    }
}

/// Credentials looked up by folded name; used for both the operator table
/// and the SASL account store.
#[derive(Debug, Clone, Default)]
pub struct PasswordStore {
    hashes: HashMap<String, String>,
}

impl PasswordStore {
    pub fn new(table: &HashMap<String, String>) -> Self {
        let hashes = table.iter().map(|(name, hash)| (fold(name), hash.clone())).collect();
        PasswordStore { hashes }
    }

    pub fn verify(&self, name: &str, password: &str) -> Result<(), AuthError> {
        let hash = self.hashes.get(&fold(name)).ok_or(AuthError)?;
        compare_password(hash, password)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hashes.contains_key(&fold(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(plaintext: &str) -> String {
        bcrypt::hash(plaintext, 4).unwrap()
    }

    #[test]
    fn verify_accepts_the_right_password() {
        let mut table = HashMap::new();
        table.insert("Alice".to_owned(), hash("hunter2"));
        let store = PasswordStore::new(&table);

        assert_eq!(store.verify("alice", "hunter2"), Ok(()));
        assert_eq!(store.verify("ALICE", "hunter2"), Ok(()));
    }

    #[test]
    fn failures_are_indistinguishable() {
        let mut table = HashMap::new();
        table.insert("alice".to_owned(), hash("hunter2"));
        let store = PasswordStore::new(&table);

        let wrong_password = store.verify("alice", "hunter3").unwrap_err();
        let missing_account = store.verify("nobody", "hunter2").unwrap_err();
        assert_eq!(wrong_password, missing_account);
    }

    #[test]
    fn compare_rejects_garbage_hashes() {
        assert_eq!(compare_password("not-a-hash", "pw"), Err(AuthError));
    }
}
