/*!
Bundled formatter variants and the policy-driven choice of sub-format.
*/

pub mod property_set;
pub mod stream;

use std::fmt;

use crate::compression::FrameCodec;
use crate::policy::Policy;
use crate::{PersistError, Result};

pub use property_set::PropertySetFormatter;

/// Destination table of a table-backed formatter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    /// Default table, overridable per call with `tableName` in additional data
    pub name: String,
    /// Column identifying the row an update replaces
    pub key: Option<String>,
}

/// Concrete representation a formatter writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubFormat {
    Text,
    Binary { codec: FrameCodec },
    Table(TableLayout),
}

impl SubFormat {
    /// Select the sub-format named by the policy's `format` key
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If `format` is missing or unknown, or a
    ///   key the chosen sub-format needs is missing or ill-typed
    pub fn from_policy(policy: &Policy) -> Result<Self> {
        let format: String = policy.require("format")?;
        match format.as_str() {
            "text" => Ok(SubFormat::Text),
            "binary" => {
                let codec = if policy.get("compression.enabled", false)? {
                    FrameCodec::gzip(policy.get("compression.level", 6u32)?)?
                } else {
                    FrameCodec::Plain
                };
                Ok(SubFormat::Binary { codec })
            }
            "table" => Ok(SubFormat::Table(TableLayout {
                name: policy.require("table.name")?,
                key: policy.get("table.key", None)?,
            })),
            other => Err(PersistError::configuration(format!(
                "Unknown format '{other}'; expected one of text, binary, table"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SubFormat::Text => "text",
            SubFormat::Binary { .. } => "binary",
            SubFormat::Table(_) => "table",
        }
    }
}

impl fmt::Display for SubFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
