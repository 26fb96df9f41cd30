//! Transaction Module
//!
//! Unit-of-work support: a per-transaction callback queue and a template
//! that drains it on commit or rollback.

mod scope;
mod template;

pub use scope::{PendingCacheMutation, TransactionScope, TransactionStatus, TxId};
pub use template::{TransactionCoordinator, TransactionTemplate};
