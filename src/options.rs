//! Generator configuration.

use serde::Deserialize;

use crate::{err_msg, SourcerError};

/// Smallest nesting budget the emitter can work with.
pub const MIN_BLOCKS: usize = 2;

/// Options accepted by `Grammar::builder`.
///
/// ```rust
/// use sourcer::GrammarOptions;
/// let opts = GrammarOptions::from_json(r#"{"name": "calc", "max_blocks": 8}"#).unwrap();
/// assert_eq!(opts.name, "calc");
/// assert!(!opts.include_source);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrammarOptions {
    /// Module name, used in diagnostics.
    pub name: String,
    /// Keep the program listing on the loaded module.
    pub include_source: bool,
    /// Nesting budget before a sub-expression gets its own function.
    pub max_blocks: usize,
    /// Widest input line shown untrimmed in error excerpts.
    pub excerpt_width: usize,
}

impl Default for GrammarOptions {
    fn default() -> Self {
        Self {
            name: "grammar".to_string(),
            include_source: false,
            max_blocks: 20,
            excerpt_width: 96,
        }
    }
}

impl GrammarOptions {
    pub fn from_json(json: &str) -> Result<Self, SourcerError> {
        let options: GrammarOptions = serde_json::from_str(json)
            .map_err(|e| err_msg!(Grammar, "invalid grammar options: {}", e))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), SourcerError> {
        if self.max_blocks < MIN_BLOCKS {
            return Err(err_msg!(
                Grammar,
                "max_blocks must be at least {}, got {}",
                MIN_BLOCKS,
                self.max_blocks
            ));
        }
        if self.excerpt_width < 16 {
            return Err(err_msg!(Grammar, "excerpt_width must be at least 16"));
        }
        Ok(())
    }
}
