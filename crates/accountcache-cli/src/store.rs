use anyhow::{Context, Result};
use keyring::Entry;
use tracing::debug;

use accountcache_core::AccountNumber;

const SERVICE_NAME: &str = "accountcache";

/// Keychain entry under which the last used account number is stored
const ENTRY_NAME: &str = "account-number";

/// Remembers the last used account number in the OS keychain.
pub struct AccountStore;

impl AccountStore {
    fn entry() -> Result<Entry> {
        Entry::new(SERVICE_NAME, ENTRY_NAME).context("Failed to create keyring entry")
    }

    /// Store the account number, replacing any previous one
    pub fn remember(account: &AccountNumber) -> Result<()> {
        Self::entry()?
            .set_password(account.as_str())
            .context("Failed to store account number in keychain")?;
        debug!(account = %account, "Account number stored in keychain");
        Ok(())
    }

    /// The stored account number, if any.
    /// An entry that no longer parses is treated as absent.
    pub fn load() -> Result<Option<AccountNumber>> {
        match Self::entry()?.get_password() {
            Ok(stored) => Ok(AccountNumber::new(&stored).ok()),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read account number from keychain"),
        }
    }

    /// Remove the stored account number. Returns false if none was stored.
    pub fn forget() -> Result<bool> {
        match Self::entry()?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e).context("Failed to delete account number from keychain"),
        }
    }
}
