mod config;
mod types;

pub(crate) use config::GENERIC_DATA_STORE;
