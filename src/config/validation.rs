//! Credential and model-selection validation.
//!
//! These checks run twice: once over the whole file in `Config::validate`
//! and again whenever a job context is built, so a job can never start with
//! a credential that would only be rejected halfway through a remote call.

/// Sample-config phrases rejected wherever they appear in a key.
const PLACEHOLDER_PHRASES: &[&str] = &["your_api_key", "replace_this", "please_set"];

/// Literal values rejected only when they are the whole key.
const PLACEHOLDER_LITERALS: &[&str] = &["null", "undefined"];

const MIN_SECRET_LEN: usize = 32;

/// Validates a cloud secret id (`AKID...`, at least 32 characters).
pub(crate) fn validate_secret_id(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("must not be empty".to_string());
    }
    if !value.starts_with("AKI") {
        return Err("must start with 'AKID'".to_string());
    }
    if value.chars().count() < MIN_SECRET_LEN {
        return Err(format!("must be at least {} characters", MIN_SECRET_LEN));
    }
    Ok(())
}

/// Validates a cloud secret key (at least 32 characters).
pub(crate) fn validate_secret_key(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("must not be empty".to_string());
    }
    if value.chars().count() < MIN_SECRET_LEN {
        return Err(format!("must be at least {} characters", MIN_SECRET_LEN));
    }
    Ok(())
}

/// Validates an agent API key.
///
/// The key ends up in an HTTP header, so every character must fit in a
/// single byte. Obvious placeholders left over from a sample config are
/// rejected.
pub(crate) fn validate_api_key(value: &str) -> Result<(), String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("must not be empty".to_string());
    }
    if let Some(c) = trimmed.chars().find(|c| u32::from(*c) > 0xFF) {
        return Err(format!(
            "contains character '{}' that cannot be sent in a request header",
            c
        ));
    }
    let lowered = trimmed.to_ascii_lowercase();
    if PLACEHOLDER_PHRASES.iter().any(|p| lowered.contains(p))
        || PLACEHOLDER_LITERALS.contains(&lowered.as_str())
    {
        return Err("looks like a placeholder value".to_string());
    }
    Ok(())
}

pub(crate) fn validate_model(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("must not be empty".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_ID: &str = "AKIDabcdefghijklmnopqrstuvwxyz0123";
    const GOOD_KEY: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

    #[test]
    fn secret_id_accepts_well_formed_value() {
        assert!(validate_secret_id(GOOD_ID).is_ok());
    }

    #[test]
    fn secret_id_rejects_wrong_prefix_and_short_values() {
        assert!(validate_secret_id("").is_err());
        assert!(validate_secret_id("XXIDabcdefghijklmnopqrstuvwxyz0123").is_err());
        let err = validate_secret_id("AKIDshort").unwrap_err();
        assert!(err.contains("32"));
    }

    #[test]
    fn secret_key_requires_minimum_length() {
        assert!(validate_secret_key(GOOD_KEY).is_ok());
        assert!(validate_secret_key("").is_err());
        assert!(validate_secret_key("tooshort").is_err());
    }

    #[test]
    fn api_key_rejects_placeholders_case_insensitively() {
        assert!(validate_api_key("sk-live-8f2a9c").is_ok());
        for placeholder in ["your_api_key", "REPLACE_THIS", "please_set_me", "null", "Undefined"] {
            let err = validate_api_key(placeholder).unwrap_err();
            assert!(err.contains("placeholder"), "{placeholder}: {err}");
        }
    }

    #[test]
    fn api_key_may_contain_null_or_undefined_as_substring() {
        assert!(validate_api_key("sk-8fnull3c2b7e41d04a6b").is_ok());
        assert!(validate_api_key("sk-undefined9a1c77").is_ok());
        assert!(validate_api_key("  NULL  ").is_err());
    }

    #[test]
    fn api_key_rejects_characters_outside_latin1() {
        assert!(validate_api_key("sk-é-ok").is_ok());
        let err = validate_api_key("sk-密钥").unwrap_err();
        assert!(err.contains("header"));
    }

    #[test]
    fn api_key_and_model_reject_blank() {
        assert!(validate_api_key("   ").is_err());
        assert!(validate_model("").is_err());
        assert!(validate_model("qwen-max").is_ok());
    }
}
