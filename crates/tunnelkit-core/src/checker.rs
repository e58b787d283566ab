//! Configuration syntax checking
//!
//! The tunnel engine owns the real grammar of its configuration documents.
//! Everything that persists or starts a document goes through a
//! [`ConfigChecker`] so the engine's own message reaches the user unchanged.

/// Pure syntax check over a configuration document
pub trait ConfigChecker: Send + Sync {
    /// Check `content`, returning the checker's message verbatim on failure
    ///
    /// # Errors
    /// Returns the checker's diagnostic when the document is not valid
    fn check_config(&self, content: &str) -> Result<(), String>;
}

/// Accepts any document that is a JSON object
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConfigChecker;

impl ConfigChecker for JsonConfigChecker {
    fn check_config(&self, content: &str) -> Result<(), String> {
        let value: serde_json::Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
        if value.is_object() {
            Ok(())
        } else {
            Err("configuration must be a JSON object".to_string())
        }
    }
}
