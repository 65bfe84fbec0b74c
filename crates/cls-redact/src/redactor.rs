use std::borrow::Cow;

use regex::{Captures, Regex};

use cls_types::{HiddenData, SaverConfig};

use crate::dependency::classify_upm_version;
use crate::environment::UserEnvironment;

const AWS_ACCESS_KEY_PATTERN: &str = r"(?<prefix>AWSAccessKeyId=)[^&\s]+";
const ASSET_URL_PATTERN: &str = r#"(?<prefix>"assetUrl"\s*:\s*")(?:[^\x00-\x1F"\\]|\\(?:u[a-fA-F0-9]{4}|[^"\\/bfnrt]))*(?<suffix>")"#;
const SIGNATURE_PATTERN: &str = r"(?<prefix>Signature=)[^&\s]+";

/// Audit order of the `Hidden-Data` header
const AUDIT_ORDER: [HiddenData; 5] = [
    HiddenData::UserName,
    HiddenData::UserHome,
    HiddenData::AwsAccessKeyIdParam,
    HiddenData::AssetUrl,
    HiddenData::SignatureParam,
];

/// One rewrite step: matches become `prefix${category}suffix`
#[derive(Clone)]
struct Rule {
    category: HiddenData,
    regex: Regex,
}

impl Rule {
    fn new(category: HiddenData, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            category,
            regex: Regex::new(pattern)?,
        })
    }

    fn replacement(&self, caps: &Captures<'_>) -> String {
        let mut out = String::new();
        if let Some(prefix) = caps.name("prefix") {
            out.push_str(prefix.as_str());
        }
        out.push_str(&self.category.placeholder());
        if let Some(suffix) = caps.name("suffix") {
            out.push_str(suffix.as_str());
        }
        out
    }

    /// Rewrite matches that do not touch an already placed placeholder.
    /// Returns `None` when nothing matched.
    fn apply(&self, text: &str, placeholders: &Regex) -> Option<String> {
        let protected: Vec<(usize, usize)> = placeholders
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();

        let replaced = self.regex.replace_all(text, |caps: &Captures<'_>| {
            let whole = &caps[0];
            let start = caps.get(0).map_or(0, |m| m.start());
            let end = start + whole.len();
            if protected.iter().any(|&(s, e)| start < e && s < end) {
                whole.to_string()
            } else {
                self.replacement(caps)
            }
        });

        match replaced {
            Cow::Owned(rewritten) => Some(rewritten),
            Cow::Borrowed(_) => None,
        }
    }
}

/// Ordered set of redaction rules built from a [`SaverConfig`]
#[derive(Clone)]
pub struct Redactor {
    rules: Vec<Rule>,
    placeholders: Regex,
}

impl Redactor {
    pub fn new(config: &SaverConfig, env: &UserEnvironment) -> Result<Self, regex::Error> {
        let mut rules = vec![
            Rule::new(HiddenData::AwsAccessKeyIdParam, AWS_ACCESS_KEY_PATTERN)?,
            Rule::new(HiddenData::AssetUrl, ASSET_URL_PATTERN)?,
        ];

        if config.hide_aws_upload_signature {
            rules.push(Rule::new(HiddenData::SignatureParam, SIGNATURE_PATTERN)?);
        }

        if config.hide_user_home {
            match env.home_dir.as_deref().and_then(home_pattern) {
                Some(pattern) => rules.push(Rule::new(HiddenData::UserHome, &pattern)?),
                None => tracing::warn!("Home directory unknown, user-home redaction has nothing to match"),
            }
        }

        if config.hide_user_name {
            match env.user_name.as_deref().filter(|n| !n.is_empty()) {
                Some(name) => rules.push(Rule::new(
                    HiddenData::UserName,
                    &format!("(?i){}", regex::escape(name)),
                )?),
                None => tracing::warn!("User name unknown, user-name redaction has nothing to match"),
            }
        }

        let categories = AUDIT_ORDER
            .iter()
            .map(|c| regex::escape(c.as_str()))
            .collect::<Vec<_>>()
            .join("|");
        let placeholders = Regex::new(&format!(r"\$\{{(?:{categories})\}}"))?;

        Ok(Self {
            rules,
            placeholders,
        })
    }

    /// Apply every rule in order
    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut output = Cow::Borrowed(text);
        for rule in &self.rules {
            if let Some(rewritten) = rule.apply(&output, &self.placeholders) {
                output = Cow::Owned(rewritten);
            }
        }
        output
    }

    /// Redact a UPM version only when it may point at a local path
    pub fn redact_upm_version<'a>(&self, version: &'a str) -> Cow<'a, str> {
        if classify_upm_version(version).may_contain_local_path(version) {
            self.redact(version)
        } else {
            Cow::Borrowed(version)
        }
    }

    /// Active categories in audit order, one `Hidden-Data` header each
    pub fn hidden_data(&self) -> Vec<HiddenData> {
        AUDIT_ORDER
            .iter()
            .copied()
            .filter(|c| self.rules.iter().any(|r| r.category == *c))
            .collect()
    }
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor")
            .field("hidden_data", &self.hidden_data())
            .finish()
    }
}

/// Home path as a separator-agnostic pattern, matched case-insensitively
fn home_pattern(home: &str) -> Option<String> {
    let trimmed = home.trim_end_matches(['/', '\\']);
    if !trimmed.split(['/', '\\']).any(|c| !c.is_empty()) {
        return None;
    }
    let joined = trimmed
        .split(['/', '\\'])
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"[/\\]");
    Some(format!("(?i){joined}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn alice() -> UserEnvironment {
        UserEnvironment::new("/Users/Alice", "alice")
    }

    fn redactor(config: &SaverConfig) -> Redactor {
        Redactor::new(config, &alice()).unwrap()
    }

    #[test]
    fn test_home_is_case_and_separator_insensitive() {
        let r = redactor(&SaverConfig::default());
        assert_eq!(
            r.redact("Found at /USERS/alice/project/file.cs"),
            "Found at ${user-home}/project/file.cs"
        );
        assert_eq!(
            r.redact(r"Found at \Users\ALICE\x"),
            "Found at ${user-home}\\x"
        );
    }

    #[test]
    fn test_windows_home() {
        let env = UserEnvironment::new(r"C:\Users\Bob", "bob");
        let r = Redactor::new(&SaverConfig::default(), &env).unwrap();
        assert_eq!(r.redact("c:/users/bob/Assets/A.cs"), "${user-home}/Assets/A.cs");
    }

    #[test]
    fn test_user_name_not_inside_placeholder() {
        let env = UserEnvironment::new("/home/user", "user");
        let r = Redactor::new(&SaverConfig::default(), &env).unwrap();
        assert_eq!(
            r.redact("/home/user/a by user"),
            "${user-home}/a by ${user-name}"
        );
    }

    #[test]
    fn test_query_parameters() {
        let r = redactor(&SaverConfig::default());
        assert_eq!(
            r.redact("https://s3/x?AWSAccessKeyId=AKIA123&Signature=abc%2F&Expires=1"),
            "https://s3/x?AWSAccessKeyId=${aws-access-key-id-param}&Signature=${signature-param}&Expires=1"
        );
    }

    #[test]
    fn test_signature_kept_when_disabled() {
        let config = SaverConfig {
            hide_aws_upload_signature: false,
            ..SaverConfig::default()
        };
        let r = redactor(&config);
        assert_eq!(r.redact("?Signature=abc"), "?Signature=abc");
        assert!(!r.hidden_data().contains(&HiddenData::SignatureParam));
    }

    #[test]
    fn test_asset_url_json() {
        let r = redactor(&SaverConfig::default());
        assert_eq!(
            r.redact(r#"{"assetUrl" : "https://cdn/x?y=1", "id": 3}"#),
            r#"{"assetUrl" : "${asset-url}", "id": 3}"#
        );
    }

    #[test]
    fn test_hidden_data_audit_order() {
        assert_eq!(
            redactor(&SaverConfig::default()).hidden_data(),
            vec![
                HiddenData::UserName,
                HiddenData::UserHome,
                HiddenData::AwsAccessKeyIdParam,
                HiddenData::AssetUrl,
                HiddenData::SignatureParam,
            ]
        );

        let minimal = SaverConfig {
            hide_user_name: false,
            hide_user_home: false,
            hide_os_info: true,
            hide_aws_upload_signature: false,
        };
        assert_eq!(
            redactor(&minimal).hidden_data(),
            vec![HiddenData::AwsAccessKeyIdParam, HiddenData::AssetUrl]
        );
    }

    #[test]
    fn test_unknown_environment_skips_rules() {
        let r = Redactor::new(&SaverConfig::default(), &UserEnvironment::default()).unwrap();
        assert_eq!(r.redact("/Users/Alice"), "/Users/Alice");
        assert!(!r.hidden_data().contains(&HiddenData::UserHome));
    }

    #[test]
    fn test_upm_versions() {
        let r = redactor(&SaverConfig::default());
        assert_eq!(r.redact_upm_version("file:/Users/alice/pkg"), "file:${user-home}/pkg");
        assert_eq!(r.redact_upm_version("file:../alice"), "file:../alice");
        assert_eq!(
            r.redact_upm_version("file:../../alice"),
            "file:../../${user-name}"
        );
        assert_eq!(
            r.redact_upm_version("https://github.com/alice/repo.git"),
            "https://github.com/alice/repo.git"
        );
    }

    #[test]
    fn test_unmatched_text_is_borrowed() {
        let r = redactor(&SaverConfig::default());
        assert!(matches!(r.redact("nothing to see"), Cow::Borrowed(_)));
    }

    proptest! {
        #[test]
        fn prop_redaction_is_idempotent(
            parts in prop::collection::vec(
                prop_oneof![
                    Just("/Users/Alice/x".to_string()),
                    Just("ALICE".to_string()),
                    Just("\\users\\alice".to_string()),
                    Just("AWSAccessKeyId=AKIA42".to_string()),
                    Just("Signature=s1g".to_string()),
                    Just("\"assetUrl\": \"https://cdn/a\"".to_string()),
                    Just("${user-home}".to_string()),
                    "[a-z]{1,6}",
                ],
                0..10,
            )
        ) {
            let r = redactor(&SaverConfig::default());
            let text = parts.join(" ");
            let once = r.redact(&text).into_owned();
            let twice = r.redact(&once).into_owned();
            prop_assert_eq!(once, twice);
        }
    }
}
