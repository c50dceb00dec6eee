//! Identifier generation and validation.
//!
//! Task ids are opaque strings of the form `tx-<lowercase-alphanumeric>`
//! with a 6..=12 character suffix. Worker and run ids carry fixed 8-char
//! hex suffixes derived from a v4 UUID.

use rand::RngExt;
use uuid::Uuid;

/// Alphabet for task id suffixes.
const TASK_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of freshly generated task id suffixes.
const TASK_SUFFIX_LEN: usize = 8;

pub const TASK_PREFIX: &str = "tx-";
pub const WORKER_PREFIX: &str = "worker-";
pub const RUN_PREFIX: &str = "run-";

/// Generate a new task identifier, e.g. `tx-k3f9a21x`.
///
/// Collisions are possible and handled by the caller with a retry.
pub fn new_task_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..TASK_SUFFIX_LEN)
        .map(|_| TASK_ALPHABET[rng.random_range(0..TASK_ALPHABET.len())] as char)
        .collect();
    format!("{TASK_PREFIX}{suffix}")
}

/// Generate a new worker identifier, e.g. `worker-9f8a2c41`.
pub fn new_worker_id() -> String {
    format!("{WORKER_PREFIX}{}", hex8())
}

/// Generate a new run identifier, e.g. `run-a1b2c3d4`.
pub fn new_run_id() -> String {
    format!("{RUN_PREFIX}{}", hex8())
}

fn hex8() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Validate a task id against `^tx-[a-z0-9]{6,12}$`.
pub fn is_valid_task_id(id: &str) -> bool {
    let Some(suffix) = id.strip_prefix(TASK_PREFIX) else {
        return false;
    };
    (6..=12).contains(&suffix.len())
        && suffix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Validate a worker id against `^worker-[0-9a-f]{8}$`.
pub fn is_valid_worker_id(id: &str) -> bool {
    hex_suffix_valid(id, WORKER_PREFIX)
}

/// Validate a run id against `^run-[0-9a-f]{8}$`.
pub fn is_valid_run_id(id: &str) -> bool {
    hex_suffix_valid(id, RUN_PREFIX)
}

fn hex_suffix_valid(id: &str, prefix: &str) -> bool {
    let Some(suffix) = id.strip_prefix(prefix) else {
        return false;
    };
    suffix.len() == 8 && suffix.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_shape() {
        let id = new_task_id();
        assert!(is_valid_task_id(&id), "generated id must validate: {id}");
        assert_eq!(id.len(), TASK_PREFIX.len() + TASK_SUFFIX_LEN);
    }

    #[test]
    fn test_task_id_validation() {
        assert!(is_valid_task_id("tx-abc123"));
        assert!(is_valid_task_id("tx-aaaaaaaaaaaa"));
        assert!(!is_valid_task_id("tx-abc12")); // too short
        assert!(!is_valid_task_id("tx-aaaaaaaaaaaaa")); // too long
        assert!(!is_valid_task_id("tx-ABC123")); // uppercase
        assert!(!is_valid_task_id("tx-abc_12")); // punctuation
        assert!(!is_valid_task_id("task-abc123")); // wrong prefix
        assert!(!is_valid_task_id(""));
    }

    #[test]
    fn test_worker_and_run_ids() {
        assert!(is_valid_worker_id(&new_worker_id()));
        assert!(is_valid_run_id(&new_run_id()));
        assert!(is_valid_run_id("run-a1b2c3d4"));
        assert!(!is_valid_run_id("run-a1b2c3d")); // short
        assert!(!is_valid_worker_id("worker-XYZ12345"));
    }
}
