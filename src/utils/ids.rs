// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use uuid::Uuid;

/// Mint an id of the form `<prefix>_<8 hex chars>`.
///
/// # Examples
///
/// ```
/// use activity_engine::utils::unique_id;
///
/// let id = unique_id("task_1");
/// assert!(id.starts_with("task_1_"));
/// assert_eq!(id.len(), "task_1_".len() + 8);
/// ```
pub fn unique_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct() {
        assert_ne!(unique_id("a"), unique_id("a"));
    }
}
