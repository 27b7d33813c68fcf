use serde::{Deserialize, Serialize};

/// Data stored in the cache. The payload is a JSON string produced by the
/// owning module; the cache itself never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacheData {
    pub(crate) value: String,
}
