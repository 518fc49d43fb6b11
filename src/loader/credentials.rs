//! Credential decoding hook.

/// Turns a configured credential value into the value used to connect.
pub trait CredentialDecoder: Send + Sync {
    fn decode(&self, value: &str) -> Result<String, String>;
}

/// Whether a value is wrapped as `ENC(...)`.
pub fn is_encrypted(value: &str) -> bool {
    let v = value.trim();
    v.len() > 5 && v.starts_with("ENC(") && v.ends_with(')')
}

/// Passes plain values through and refuses encrypted ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDecoder;

impl CredentialDecoder for PlainDecoder {
    fn decode(&self, value: &str) -> Result<String, String> {
        if is_encrypted(value) {
            return Err("value is encrypted but no credential decoder is configured".to_string());
        }
        Ok(value.to_string())
    }
}
