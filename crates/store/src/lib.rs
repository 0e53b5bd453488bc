pub mod memory;
pub mod sqlite;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

use async_trait::async_trait;
use tracing::{debug, warn};

use common::{Address, Error, Result, TradingSession};

/// Prefix of every session storage key.
pub const KEY_PREFIX: &str = "poly_trading_session_";

/// `<prefix><lower-cased owner address>`
pub fn storage_key(owner: &Address) -> String {
    // Address renders lower-case, so differently-cased inputs share a key.
    format!("{KEY_PREFIX}{owner}")
}

/// Durable key-value persistence of one `TradingSession` per owner.
///
/// Backends provide raw string storage; `load`, `save` and `clear` add the
/// keying and integrity rules on top.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;
    async fn write(&self, key: &str, payload: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;

    /// The stored session for `owner`. Malformed records read as absent; a
    /// record belonging to a different owner is discarded.
    async fn load(&self, owner: &Address) -> Result<Option<TradingSession>> {
        let key = storage_key(owner);
        let Some(raw) = self.read(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<TradingSession>(&raw) {
            Ok(session) if session.owner_address == *owner => {
                debug!(owner = %owner, "Loaded stored session");
                Ok(Some(session))
            }
            Ok(session) => {
                warn!(
                    owner = %owner,
                    stored_owner = %session.owner_address,
                    "Stored session belongs to another owner, discarding"
                );
                self.remove(&key).await?;
                Ok(None)
            }
            Err(e) => {
                warn!(owner = %owner, error = %e, "Stored session is malformed, ignoring");
                Ok(None)
            }
        }
    }

    async fn save(&self, owner: &Address, session: &TradingSession) -> Result<()> {
        if session.owner_address != *owner {
            return Err(Error::Integrity(format!(
                "refusing to store session of {} under owner {owner}",
                session.owner_address
            )));
        }
        let payload = serde_json::to_string(session)?;
        self.write(&storage_key(owner), &payload).await
    }

    async fn clear(&self, owner: &Address) -> Result<()> {
        self.remove(&storage_key(owner)).await
    }
}
