//! User DAO

use std::sync::Arc;

use serde_json::json;

use crate::cache::KeyBuilder;
use crate::dao::DaoSupport;
use crate::error::Result;
use crate::persistence::rows_affected;
use crate::transaction::TransactionScope;

const KEYS: KeyBuilder = KeyBuilder::new("UserDao");

#[derive(Debug, Clone)]
pub struct UserDao {
    support: DaoSupport,
}

impl UserDao {
    pub fn new(support: DaoSupport) -> Self {
        Self { support }
    }

    pub fn key_for_enabled_user_count() -> String {
        KEYS.build("enabledUserCount", &[])
    }

    // == Writes ==

    pub fn save(&self, name: &str, enabled: bool) -> Result<()> {
        self.write("saveUser", json!({ "name": name, "enabled": enabled }))
            .map(|_| ())
    }

    /// Enables the named users. Returns how many exist.
    pub fn enable(&self, names: &[&str]) -> Result<u64> {
        self.write("setUsersEnabled", json!({ "names": names, "enabled": true }))
    }

    /// Disables the named users. Returns how many exist.
    pub fn disable(&self, names: &[&str]) -> Result<u64> {
        self.write("setUsersEnabled", json!({ "names": names, "enabled": false }))
    }

    /// Deletes a user. Returns false when there was no such user.
    pub fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.write("deleteUser", json!({ "name": name }))? > 0)
    }

    fn write(&self, query: &str, params: serde_json::Value) -> Result<u64> {
        let cache = Arc::clone(self.support.cache());
        self.support.transactions().execute(|scope: &mut TransactionScope| -> Result<u64> {
            let result = self.support.update_in(scope, query, params)?;
            let changed = rows_affected(query, &result)?;
            if changed > 0 {
                scope.remove_after_commit(&cache, vec![Self::key_for_enabled_user_count()]);
            }
            Ok(changed)
        })
    }

    // == Reads ==

    pub fn enabled_user_count(&self) -> Result<u32> {
        let key = Self::key_for_enabled_user_count();
        let count = self
            .support
            .reads()
            .fetch_exclusive(&key, || self.support.query::<u32>("enabledUserCount", json!({})))?;
        Ok(*count)
    }
}
