use std::path::PathBuf;

const HEARTBEAT_TICK_MS: &str = "HEARTBEAT_TICK_MS";

pub fn get_tick_interval_ms() -> Option<u64> {
    parse_env(HEARTBEAT_TICK_MS)
}

const HEARTBEAT_MAX_CONCURRENCY: &str = "HEARTBEAT_MAX_CONCURRENCY";

pub fn get_max_concurrency() -> Option<usize> {
    parse_env::<usize>(HEARTBEAT_MAX_CONCURRENCY).filter(|n| *n > 0)
}

const HEARTBEAT_START_DELAY_MS: &str = "HEARTBEAT_START_DELAY_MS";

pub fn get_start_delay_ms() -> Option<u64> {
    parse_env(HEARTBEAT_START_DELAY_MS)
}

const HEARTBEAT_DB_PATH: &str = "HEARTBEAT_DB_PATH";

pub fn get_db_path() -> Option<PathBuf> {
    std::env::var(HEARTBEAT_DB_PATH).ok().map(PathBuf::from)
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|res| res.parse().ok())
}
