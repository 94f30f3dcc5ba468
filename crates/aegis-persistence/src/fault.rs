//! Storage fault injection for runtime tests.
//!
//! When `FAULT_INJECT_STORAGE_FAILURE` is set, every write path fails
//! before touching storage. The contract is "the failure is observable,
//! state is unchanged".

/// True when the storage fault toggle is on.
pub fn storage_fault_injected() -> bool {
    env_flag("FAULT_INJECT_STORAGE_FAILURE")
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim();
            !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_parsing() {
        // Not set in the test environment by default.
        assert!(!storage_fault_injected());
    }

    #[test]
    fn test_env_flag_values() {
        std::env::set_var("AEGIS_TEST_FLAG_ON", "1");
        std::env::set_var("AEGIS_TEST_FLAG_OFF", "0");
        std::env::set_var("AEGIS_TEST_FLAG_FALSE", "false");

        assert!(env_flag("AEGIS_TEST_FLAG_ON"));
        assert!(!env_flag("AEGIS_TEST_FLAG_OFF"));
        assert!(!env_flag("AEGIS_TEST_FLAG_FALSE"));
        assert!(!env_flag("AEGIS_TEST_FLAG_UNSET"));

        std::env::remove_var("AEGIS_TEST_FLAG_ON");
        std::env::remove_var("AEGIS_TEST_FLAG_OFF");
        std::env::remove_var("AEGIS_TEST_FLAG_FALSE");
    }
}
