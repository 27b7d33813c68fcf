use std::{env, sync::LazyLock};

/// Prefix the HTTP surface is mounted under.
pub static AUTH_ROUTE_PREFIX: LazyLock<String> =
    LazyLock::new(|| env::var("AUTH_ROUTE_PREFIX").unwrap_or_else(|_| "/auth".to_string()));
