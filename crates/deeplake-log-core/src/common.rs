//! Small shared helpers for id and timestamp generation.

use chrono::Utc;
use uuid::Uuid;

/// Generate a fresh, collision-free identifier for datasets, branches, and
/// tensors. Hyphen-less so it is safe to embed in storage paths.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_path_safe() {
        let a = generate_id();
        let b = generate_id();

        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn current_timestamp_is_millisecond_scale() {
        // Anything after 2020-01-01 in milliseconds.
        assert!(current_timestamp() > 1_577_836_800_000);
    }
}
