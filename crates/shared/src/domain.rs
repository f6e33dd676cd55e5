use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of leading token characters that may appear in logs and debug output.
const TOKEN_VISIBLE_PREFIX: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostalCode {
    pub code: String,
}

impl PostalCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl fmt::Display for PostalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

/// Opaque credential issued by the subscription service.
///
/// The same token identifies a subscription before and after validation. It is
/// never decoded client-side; formatting only reveals a short prefix.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionToken(String);

impl SubscriptionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(TOKEN_VISIBLE_PREFIX).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriptionToken")
            .field(&self.redacted())
            .finish()
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[default]
    Request,
    PendingValidation,
    Active,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Request => "request",
            Step::PendingValidation => "pending_validation",
            Step::Active => "active",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_formatting_hides_everything_past_the_prefix() {
        let token = SubscriptionToken::new("gAAAAABsecretsecret");
        assert_eq!(token.to_string(), "gAAAA…");
        assert_eq!(format!("{token:?}"), "SubscriptionToken(\"gAAAA…\")");
        assert_eq!(token.expose(), "gAAAAABsecretsecret");
    }

    #[test]
    fn short_tokens_are_not_padded() {
        assert_eq!(SubscriptionToken::new("ab").redacted(), "ab…");
    }

    #[test]
    fn postal_code_uses_plain_object_shape() {
        let decoded: Vec<PostalCode> =
            serde_json::from_str(r#"[{"code":"28001"},{"code":"08001"}]"#).expect("decode");
        assert_eq!(decoded, vec![PostalCode::new("28001"), PostalCode::new("08001")]);
    }
}
