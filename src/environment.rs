use std::collections::{HashMap, HashSet};
use std::env;

/// Starting point when building the child's environment. Mirrors the
/// `inherit` modes of `codex-core`'s `ShellEnvironmentPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InheritMode {
    /// A small, platform-appropriate core set (PATH, HOME, USER, ...).
    Core,
    /// The caller's full environment.
    #[default]
    All,
    /// Nothing from the caller's environment.
    None,
}

#[cfg(unix)]
const CORE_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "USER", "TMPDIR", "LANG"];
#[cfg(windows)]
const CORE_VARS: &[&str] = &["PATH", "SYSTEMROOT", "TEMP", "TMP", "USERPROFILE", "USERNAME"];

/// Builds the child's execution environment from the caller's environment
/// with a defined override set (spec §6 "Environment inheritance").
///
/// Derivation order:
/// 1. Seed from `inherit`.
/// 2. Forward any variable named in `export_set` regardless of `inherit`
///    (this is the "name is present in the caller's export set" rule).
/// 3. Apply `overrides`: `Some(value)` sets/replaces, `None` unsets.
/// 4. If `force_utf8`, pin `LANG`/`LC_ALL` to a UTF-8 locale.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentPolicy {
    pub inherit: InheritMode,
    pub export_set: HashSet<String>,
    pub overrides: HashMap<String, Option<String>>,
    pub force_utf8: bool,
}

impl EnvironmentPolicy {
    pub fn new(inherit: InheritMode) -> Self {
        Self { inherit, ..Default::default() }
    }

    pub fn forward(mut self, name: impl Into<String>) -> Self {
        self.export_set.insert(name.into());
        self
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), Some(value.into()));
        self
    }

    pub fn unset(mut self, name: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), None);
        self
    }

    pub fn force_utf8(mut self, yes: bool) -> Self {
        self.force_utf8 = yes;
        self
    }

    pub fn build(&self) -> HashMap<String, String> {
        let mut env_map: HashMap<String, String> = match self.inherit {
            InheritMode::All => env::vars().collect(),
            InheritMode::Core => env::vars().filter(|(k, _)| CORE_VARS.contains(&k.as_str())).collect(),
            InheritMode::None => HashMap::new(),
        };

        if self.inherit != InheritMode::All {
            for name in &self.export_set {
                if let Ok(value) = env::var(name) {
                    env_map.insert(name.clone(), value);
                }
            }
        }

        for (k, v) in &self.overrides {
            match v {
                Some(value) => {
                    env_map.insert(k.clone(), value.clone());
                }
                None => {
                    env_map.remove(k);
                }
            }
        }

        if self.force_utf8 {
            env_map.insert("LANG".to_string(), "C.UTF-8".to_string());
            env_map.insert("LC_ALL".to_string(), "C.UTF-8".to_string());
        }

        env_map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_inherit_only_keeps_overrides() {
        let policy = EnvironmentPolicy::new(InheritMode::None).set("FOO", "bar");
        let env = policy.build();
        assert_eq!(env.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn unset_removes_inherited_var() {
        // SAFETY: single-threaded test, no concurrent env access.
        unsafe {
            env::set_var("SUBPROCESS_RUNNER_TEST_VAR", "1");
        }
        let policy = EnvironmentPolicy::new(InheritMode::All).unset("SUBPROCESS_RUNNER_TEST_VAR");
        let env = policy.build();
        assert!(!env.contains_key("SUBPROCESS_RUNNER_TEST_VAR"));
        unsafe {
            env::remove_var("SUBPROCESS_RUNNER_TEST_VAR");
        }
    }

    #[test]
    fn force_utf8_pins_locale() {
        let policy = EnvironmentPolicy::new(InheritMode::None).force_utf8(true);
        let env = policy.build();
        assert_eq!(env.get("LANG").map(String::as_str), Some("C.UTF-8"));
        assert_eq!(env.get("LC_ALL").map(String::as_str), Some("C.UTF-8"));
    }
}
