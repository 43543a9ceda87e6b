//! Generated constants artifact.
//!
//! Renders every registered service key as an associated constant of a
//! `SpyEvents` struct, so tests can write `SpyEvents::TableOrders` instead
//! of a string literal.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use spyglass_sdk::ServiceKey;

#[derive(Debug, thiserror::Error)]
pub enum ConstantsError {
    #[error("service keys {first} and {second} both normalize to {name}")]
    Collision {
        name: String,
        first: ServiceKey,
        second: ServiceKey,
    },

    #[error("service key {0} has no identifier characters")]
    Empty(ServiceKey),

    #[error("failed to write constants file: {0}")]
    Io(#[from] std::io::Error),
}

/// Constant name for `key`: the key with every non-identifier character
/// removed.
pub fn constant_name(key: &ServiceKey) -> String {
    key.as_str()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

pub fn render_constants(keys: &[ServiceKey]) -> Result<String, ConstantsError> {
    let mut seen: HashMap<String, &ServiceKey> = HashMap::with_capacity(keys.len());
    let mut body = String::new();

    for key in keys {
        let name = constant_name(key);
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(ConstantsError::Empty(key.clone()));
        }
        if let Some(first) = seen.insert(name.clone(), key) {
            return Err(ConstantsError::Collision {
                name,
                first: first.clone(),
                second: key.clone(),
            });
        }
        // Writing to a String cannot fail.
        let _ = writeln!(body, "    pub const {name}: &'static str = {:?};", key.as_str());
    }

    Ok(format!(
        "// @generated by `spyglass instrument`. Do not edit.\n\
         \n\
         pub struct SpyEvents;\n\
         \n\
         #[allow(non_upper_case_globals)]\n\
         impl SpyEvents {{\n\
         {body}}}\n"
    ))
}

/// Render and write the constants file, creating parent directories.
pub fn write_constants(path: &Path, keys: &[ServiceKey]) -> Result<(), ConstantsError> {
    let source = render_constants(keys)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, source)?;
    Ok(())
}
