//! Schema evolution: raw entries <-> typed domain events.
//!
//! Each bounded context builds one [`EntryAdapterRegistry`] at startup and hands
//! it to whichever component decodes entries (usually a projection). There is
//! no global registry.
//!
//! A decoder is a plain function of `(stored_version, payload)`; older versions
//! are upcast inside the decoder with explicit per-version branches.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::entry::{Entry, NewEntry};
use crate::event::Event;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("no adapter registered for entry type '{0}'")]
    UnknownType(String),

    #[error("entry type '{entry_type}' stored at version {stored}, newer than current version {current}")]
    FutureVersion {
        entry_type: String,
        stored: u32,
        current: u32,
    },

    #[error("failed to decode '{entry_type}' v{version}: {reason}")]
    Decode {
        entry_type: String,
        version: u32,
        reason: String,
    },

    #[error("failed to encode '{entry_type}': {reason}")]
    Encode { entry_type: String, reason: String },
}

impl AdapterError {
    pub fn decode(entry_type: impl Into<String>, version: u32, reason: impl ToString) -> Self {
        Self::Decode {
            entry_type: entry_type.into(),
            version,
            reason: reason.to_string(),
        }
    }
}

/// Decoder for one entry type: `(stored_version, payload) -> event`.
pub type DecodeFn<E> = Box<dyn Fn(u32, &JsonValue) -> Result<E, AdapterError> + Send + Sync>;

struct Adapter<E> {
    current_version: u32,
    decode: DecodeFn<E>,
}

/// Explicit `type name -> decoder` table for one event family `E`.
pub struct EntryAdapterRegistry<E> {
    adapters: HashMap<String, Adapter<E>>,
}

impl<E> core::fmt::Debug for EntryAdapterRegistry<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut types: Vec<(&str, u32)> = self
            .adapters
            .iter()
            .map(|(k, a)| (k.as_str(), a.current_version))
            .collect();
        types.sort_unstable();
        f.debug_struct("EntryAdapterRegistry").field("types", &types).finish()
    }
}

impl<E> Default for EntryAdapterRegistry<E> {
    fn default() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }
}

impl<E> EntryAdapterRegistry<E>
where
    E: Event + Serialize,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for `entry_type` whose current schema is `current_version`.
    ///
    /// Re-registering a type replaces the previous decoder.
    pub fn register<F>(&mut self, entry_type: impl Into<String>, current_version: u32, decode: F) -> &mut Self
    where
        F: Fn(u32, &JsonValue) -> Result<E, AdapterError> + Send + Sync + 'static,
    {
        self.adapters.insert(
            entry_type.into(),
            Adapter {
                current_version,
                decode: Box::new(decode),
            },
        );
        self
    }

    /// Register a type that has no older schema: payloads deserialize straight into `T`.
    pub fn register_serde<T>(&mut self, entry_type: impl Into<String>, current_version: u32) -> &mut Self
    where
        T: DeserializeOwned + Into<E> + 'static,
    {
        let entry_type = entry_type.into();
        let name = entry_type.clone();
        self.register(entry_type, current_version, move |version, payload| {
            serde_json::from_value::<T>(payload.clone())
                .map(Into::into)
                .map_err(|e| AdapterError::decode(name.clone(), version, e))
        })
    }

    pub fn is_registered(&self, entry_type: &str) -> bool {
        self.adapters.contains_key(entry_type)
    }

    pub fn current_version(&self, entry_type: &str) -> Option<u32> {
        self.adapters.get(entry_type).map(|a| a.current_version)
    }

    /// Decode a stored entry, upcasting older schema versions.
    pub fn from_entry(&self, entry: &Entry) -> Result<E, AdapterError> {
        self.decode(&entry.entry_type, entry.type_version, &entry.payload)
    }

    pub fn decode(&self, entry_type: &str, version: u32, payload: &JsonValue) -> Result<E, AdapterError> {
        let adapter = self
            .adapters
            .get(entry_type)
            .ok_or_else(|| AdapterError::UnknownType(entry_type.to_string()))?;

        if version > adapter.current_version {
            return Err(AdapterError::FutureVersion {
                entry_type: entry_type.to_string(),
                stored: version,
                current: adapter.current_version,
            });
        }

        if version < adapter.current_version {
            tracing::trace!(
                entry_type,
                stored = version,
                current = adapter.current_version,
                "upcasting entry"
            );
        }

        (adapter.decode)(version, payload)
    }

    /// Encode a typed event at the registered (current) schema version.
    pub fn to_entry(&self, event: &E) -> Result<NewEntry, AdapterError> {
        let entry_type = event.event_type();
        let current = self
            .current_version(entry_type)
            .ok_or_else(|| AdapterError::UnknownType(entry_type.to_string()))?;

        let mut entry = NewEntry::from_event(event)?;
        entry.type_version = current;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct FundsDeposited {
        amount: i64,
        currency: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct AccountClosed {
        reason: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(untagged)]
    enum AccountEvent {
        FundsDeposited(FundsDeposited),
        AccountClosed(AccountClosed),
    }

    impl From<AccountClosed> for AccountEvent {
        fn from(value: AccountClosed) -> Self {
            AccountEvent::AccountClosed(value)
        }
    }

    impl Event for AccountEvent {
        fn event_type(&self) -> &'static str {
            match self {
                AccountEvent::FundsDeposited(_) => "FundsDeposited",
                AccountEvent::AccountClosed(_) => "AccountClosed",
            }
        }

        fn version(&self) -> u32 {
            match self {
                AccountEvent::FundsDeposited(_) => 2,
                AccountEvent::AccountClosed(_) => 1,
            }
        }
    }

    /// v1 stored `{ "amount": n }` with an implied currency.
    fn decode_deposit(version: u32, payload: &JsonValue) -> Result<AccountEvent, AdapterError> {
        let upcast = match version {
            1 => {
                let amount = payload
                    .get("amount")
                    .and_then(JsonValue::as_i64)
                    .ok_or_else(|| AdapterError::decode("FundsDeposited", 1, "missing amount"))?;
                json!({ "amount": amount, "currency": "EUR" })
            }
            _ => payload.clone(),
        };

        serde_json::from_value(upcast)
            .map(AccountEvent::FundsDeposited)
            .map_err(|e| AdapterError::decode("FundsDeposited", version, e))
    }

    fn registry() -> EntryAdapterRegistry<AccountEvent> {
        let mut registry = EntryAdapterRegistry::new();
        registry
            .register("FundsDeposited", 2, decode_deposit)
            .register_serde::<AccountClosed>("AccountClosed", 1);
        registry
    }

    #[test]
    fn upcasts_older_versions() {
        let event = registry()
            .decode("FundsDeposited", 1, &json!({ "amount": 40 }))
            .unwrap();

        assert_eq!(
            event,
            AccountEvent::FundsDeposited(FundsDeposited {
                amount: 40,
                currency: "EUR".to_string()
            })
        );
    }

    #[test]
    fn decodes_current_version_as_is() {
        let event = registry()
            .decode("FundsDeposited", 2, &json!({ "amount": 7, "currency": "USD" }))
            .unwrap();

        assert_eq!(event.version(), 2);
    }

    #[test]
    fn serde_registration_decodes_plain_types() {
        let event = registry()
            .decode("AccountClosed", 1, &json!({ "reason": "moved" }))
            .unwrap();
        assert_eq!(event.event_type(), "AccountClosed");
    }

    #[test]
    fn unknown_type_and_future_version_are_errors() {
        let r = registry();
        assert_eq!(
            r.decode("Nope", 1, &json!({})).unwrap_err(),
            AdapterError::UnknownType("Nope".to_string())
        );
        assert!(matches!(
            r.decode("FundsDeposited", 3, &json!({})),
            Err(AdapterError::FutureVersion { stored: 3, current: 2, .. })
        ));
    }

    #[test]
    fn to_entry_stamps_current_version() {
        let entry = registry()
            .to_entry(&AccountEvent::AccountClosed(AccountClosed {
                reason: "moved".to_string(),
            }))
            .unwrap();

        assert_eq!(entry.entry_type, "AccountClosed");
        assert_eq!(entry.type_version, 1);
        assert_eq!(entry.payload, json!({ "reason": "moved" }));
    }
}
