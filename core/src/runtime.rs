//! Process-wide rayon pool used by back-projection, plane fitting,
//! registration and reconstruction.

use crate::{Error, Result};
use rayon::ThreadPoolBuilder;
use std::env;
use std::sync::OnceLock;

/// Environment variable consulted when no explicit thread count is given.
pub const CPU_THREADS_ENV: &str = "ARC_CPU_THREADS";

static GLOBAL_POOL: OnceLock<std::result::Result<usize, String>> = OnceLock::new();

/// Worker count for the global pool; `Ok(None)` keeps rayon's default.
///
/// An explicit count wins over `env_value`. Zero is rejected either way.
pub fn resolve_thread_count(explicit: Option<usize>, env_value: Option<&str>) -> Result<Option<usize>> {
    let count = match (explicit, env_value) {
        (Some(n), _) => n,
        (None, Some(raw)) => raw.trim().parse().map_err(|_| {
            Error::InvalidInput(format!("{CPU_THREADS_ENV} must be a positive integer, got '{raw}'"))
        })?,
        (None, None) => return Ok(None),
    };
    if count == 0 {
        return Err(Error::InvalidInput("Thread count must be at least 1".to_string()));
    }
    Ok(Some(count))
}

fn read_env() -> Result<Option<String>> {
    match env::var(CPU_THREADS_ENV) {
        Ok(v) => Ok(Some(v)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(Error::InvalidInput(format!("Failed to read {CPU_THREADS_ENV}: {e}"))),
    }
}

/// Build the global pool and return its worker count.
///
/// Only the first call does any work; later calls return its outcome.
/// Fails if rayon's global pool was already started elsewhere.
pub fn init_global_thread_pool(num_threads: Option<usize>) -> Result<usize> {
    GLOBAL_POOL
        .get_or_init(|| {
            let env_value = match num_threads {
                Some(_) => None,
                None => read_env().map_err(|e| e.to_string())?,
            };
            let count = resolve_thread_count(num_threads, env_value.as_deref()).map_err(|e| e.to_string())?;

            let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("arc-worker-{i}"));
            if let Some(n) = count {
                builder = builder.num_threads(n);
            }
            builder.build_global().map_err(|e| e.to_string())?;
            Ok(rayon::current_num_threads())
        })
        .clone()
        .map_err(Error::RuntimeError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_count_wins_over_env() {
        assert_eq!(resolve_thread_count(Some(3), Some("8")).unwrap(), Some(3));
        assert_eq!(resolve_thread_count(Some(3), Some("garbage")).unwrap(), Some(3));
    }

    #[test]
    fn test_env_count_used_when_not_explicit() {
        assert_eq!(resolve_thread_count(None, Some(" 6 ")).unwrap(), Some(6));
        assert_eq!(resolve_thread_count(None, None).unwrap(), None);
    }

    #[test]
    fn test_invalid_counts_rejected() {
        for raw in ["0", "-2", "four", ""] {
            assert!(
                matches!(resolve_thread_count(None, Some(raw)), Err(Error::InvalidInput(_))),
                "accepted {raw:?}"
            );
        }
        assert!(matches!(resolve_thread_count(Some(0), None), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_init_is_idempotent() {
        let first = init_global_thread_pool(Some(2)).map_err(|e| e.to_string());
        let second = init_global_thread_pool(Some(5)).map_err(|e| e.to_string());
        assert_eq!(first, second);
        if let Ok(threads) = first {
            assert_eq!(threads, 2);
        }
    }
}
