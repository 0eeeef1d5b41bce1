use aerocache::{Bin, Key, KeyValueStore, TtlSecs};
use serde_json::{Value, json};
use shared::{Error, Result};
use tracing::info;

pub const BIN_INCLUDE: &str = "bin-include";
pub const CACHE_KEY: &str = "cache-key";
pub const KEY_PREFIX: &str = "key-to-test-with-";

pub fn describe(key: &Key) -> Value {
    json!({
        "namespace": key.namespace(),
        "setname": key.set(),
        "userkey": key.user_key().identifier(),
        "digest": key.digest().to_hex(),
    })
}

/// Writes descriptors of `count` sample keys as one list bin of the
/// `cache-key` record and returns that record's key.
pub async fn store_keys(store: &dyn KeyValueStore, namespace: &str, set: &str, count: usize) -> Result<Key> {
    let descriptors = (0..count)
        .map(|i| Key::new(namespace, set, format!("{KEY_PREFIX}{i}")).map(|key| describe(&key)))
        .collect::<Result<Vec<_>>>()?;

    let cache_key = Key::new(namespace, set, CACHE_KEY)?;
    store
        .put(
            &cache_key,
            &[Bin::new(BIN_INCLUDE, Value::Array(descriptors))],
            TtlSecs::STORE_DEFAULT,
        )
        .await?;

    info!("Stored {} key descriptor(s) under '{}'", count, CACHE_KEY);
    Ok(cache_key)
}

pub async fn load_keys(store: &dyn KeyValueStore, cache_key: &Key) -> Result<Vec<Value>> {
    let record = store
        .get(cache_key, &[BIN_INCLUDE])
        .await?
        .ok_or_else(|| Error::Decode(format!("no '{}' record", cache_key.user_key())))?;

    match record.bin(BIN_INCLUDE) {
        Some(Value::Array(descriptors)) => Ok(descriptors.clone()),
        _ => Err(Error::Decode(format!("'{BIN_INCLUDE}' is missing or not a list"))),
    }
}
