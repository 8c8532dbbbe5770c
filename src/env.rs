use std::collections::BTreeMap;

/// Configuration lookup: an optional dotenv overlay checked before the
/// process environment. Empty values are treated as unset.
#[derive(Clone, Default)]
pub struct Env {
    pub dotenv: BTreeMap<String, String>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.dotenv.keys().map(|key| key.as_str()).collect();
        f.debug_struct("Env").field("dotenv_keys", &keys).finish()
    }
}

impl Env {
    pub fn parse_dotenv(contents: &str) -> Self {
        Self {
            dotenv: parse_dotenv(contents),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.dotenv.get(key).filter(|value| !value.trim().is_empty()) {
            return Some(value.clone());
        }
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

pub fn parse_dotenv(contents: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::<String, String>::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line).trim();
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            continue;
        };

        let key = raw_key.trim();
        if key.is_empty() {
            continue;
        }

        let mut value = raw_value.trim();
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }

        out.insert(key.to_string(), value.to_string());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dotenv_skips_comments_and_strips_quotes() {
        let parsed = parse_dotenv(
            "# comment\nexport KREA_API_KEY=\"abc\"\nOPENAI_API_KEY='xyz'\n\nNOT_A_PAIR\n",
        );
        assert_eq!(parsed.get("KREA_API_KEY").map(String::as_str), Some("abc"));
        assert_eq!(parsed.get("OPENAI_API_KEY").map(String::as_str), Some("xyz"));
        assert!(!parsed.contains_key("NOT_A_PAIR"));
    }

    #[test]
    fn dotenv_overlay_wins_over_process_env() {
        let env = Env::parse_dotenv("EASEL_TEST_ONLY_KEY=overlay\n");
        assert_eq!(
            env.get("EASEL_TEST_ONLY_KEY").as_deref(),
            Some("overlay")
        );
        assert_eq!(env.get("EASEL_TEST_MISSING_KEY"), None);
    }
}
