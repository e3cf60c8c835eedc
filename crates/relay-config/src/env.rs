use std::sync::OnceLock;

use regex::Regex;

/// Expand `{{ env.VAR }}` placeholders in a raw TOML string
///
/// An optional fallback is written `{{ env.VAR | default("value") }}`;
/// without one, a missing variable is an error. TOML comment lines pass
/// through untouched so commented-out secrets do not fail the load.
pub fn expand_env(input: &str) -> Result<String, String> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| {
        Regex::new(r#"\{\{\s*env\.([A-Za-z0-9_]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
            .expect("placeholder pattern is valid")
    });

    let mut output = String::with_capacity(input.len());

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            output.push_str(line);
            output.push('\n');
            continue;
        }

        let mut cursor = 0;
        for caps in re.captures_iter(line) {
            let matched = caps.get(0).expect("capture 0 always present");
            let var = &caps[1];

            output.push_str(&line[cursor..matched.start()]);
            match std::env::var(var) {
                Ok(value) => output.push_str(&value),
                Err(_) => match caps.get(2) {
                    Some(fallback) => output.push_str(fallback.as_str()),
                    None => return Err(format!("environment variable not found: `{var}`")),
                },
            }
            cursor = matched.end();
        }
        output.push_str(&line[cursor..]);
        output.push('\n');
    }

    if !input.ends_with('\n') {
        output.pop();
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let input = "port = 4000";
        assert_eq!(expand_env(input).unwrap(), input);
    }

    #[test]
    fn expands_set_variable() {
        temp_env::with_var("RELAY_TEST_NAME", Some("edge-1"), || {
            let out = expand_env("name = \"{{ env.RELAY_TEST_NAME }}\"").unwrap();
            assert_eq!(out, "name = \"edge-1\"");
        });
    }

    #[test]
    fn missing_variable_is_an_error() {
        temp_env::with_var_unset("RELAY_TEST_MISSING", || {
            let err = expand_env("key = \"{{ env.RELAY_TEST_MISSING }}\"").unwrap_err();
            assert!(err.contains("RELAY_TEST_MISSING"));
        });
    }

    #[test]
    fn default_applies_when_unset() {
        temp_env::with_var_unset("RELAY_TEST_OPT", || {
            let out = expand_env("sep = \"{{ env.RELAY_TEST_OPT | default(\":\") }}\"").unwrap();
            assert_eq!(out, "sep = \":\"");
        });
    }

    #[test]
    fn default_ignored_when_set() {
        temp_env::with_var("RELAY_TEST_OPT", Some("-->"), || {
            let out = expand_env("sep = \"{{ env.RELAY_TEST_OPT | default(\":\") }}\"").unwrap();
            assert_eq!(out, "sep = \"-->\"");
        });
    }

    #[test]
    fn comment_lines_skip_expansion() {
        temp_env::with_var_unset("RELAY_TEST_MISSING", || {
            let input = "# key = \"{{ env.RELAY_TEST_MISSING }}\"\nport = 1";
            assert_eq!(expand_env(input).unwrap(), input);
        });
    }
}
