//! Config key validation: unknown-key detection with "did you mean?" hints.
//!
//! The raw TOML is walked before serde deserialization so that typos such as
//! `timout_ms` surface as warnings instead of silently falling back to the
//! default. Warnings never prevent startup.

use std::collections::HashSet;

/// A non-fatal config warning.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown config key '{}'", self.field)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

/// Valid dotted key paths for `PlaneConfig`.
///
/// Must be kept in sync with the section structs in `plane_config.rs`.
/// `[[services]]` entries are arrays and are not walked.
pub fn known_config_keys() -> HashSet<&'static str> {
    [
        "server",
        "server.addr",
        "probe",
        "probe.interval_ms",
        "probe.timeout_ms",
        "probe.failure_threshold",
        "breaker",
        "breaker.failure_threshold",
        "breaker.cooldown_ms",
        "healing",
        "healing.tick_ms",
        "healing.max_restarts_per_window",
        "healing.restart_window_ms",
        "healing.grace_period_ms",
        "healing.reprobe_interval_ms",
        "healing.restart_timeout_ms",
        "healing.attempts_per_episode",
        "healing.restart_backoff_ms",
        "healing.log_capacity",
        "bus",
        "bus.history_capacity",
        "bus.handler_timeout_ms",
        "analytics",
        "analytics.max_entries",
        "services",
    ]
    .into_iter()
    .collect()
}

/// Collect every dotted key path in a TOML table tree.
///
/// `{ a = { b = 1 } }` yields `["a", "a.b"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let Some(table) = value.as_table() else {
        return Vec::new();
    };

    let mut keys = Vec::new();
    for (k, v) in table {
        let path = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        if v.is_table() {
            keys.extend(walk_toml_keys(v, &path));
        }
        keys.push(path);
    }
    keys
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Closest known key within edit distance 3, ties broken alphabetically.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), *k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

/// Warnings for every unknown key in a raw TOML document.
///
/// Parse errors are left for serde to report.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|field| ValidationWarning {
            suggestion: suggest_correction(&field, &known),
            field,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("probe", "probe"), 0);
        assert_eq!(levenshtein("timout_ms", "timeout_ms"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [healing]
            tick_ms = 100
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"healing".to_string()));
        assert!(keys.contains(&"healing.tick_ms".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let warnings = validate_unknown_keys("[probe]\ntimout_ms = 100\n");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "probe.timout_ms");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("probe.timeout_ms"));
    }

    #[test]
    fn test_valid_keys_and_services_produce_no_warnings() {
        let toml_str = r#"
[server]
addr = "127.0.0.1:8080"

[bus]
history_capacity = 50

[[services]]
id = "auth"
probeEndpoint = "http://auth/health"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {warnings:?}");
    }

    #[test]
    fn test_garbage_has_no_suggestion() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }
}
