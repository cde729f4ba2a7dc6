//! Converter port (driven/secondary port)
//!
//! Converters turn a source file on one side into an IR document and render an
//! IR document back into a file for a side. How source text maps to IR nodes
//! is entirely up to the implementation; the sync engine only relies on the
//! contracts documented on each method.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because conversion failures are plugin-specific.
//! - Test conversion is best-effort and infallible from the caller's point of
//!   view: failures are reported as a [`TestConversion::Stub`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;

use crate::domain::{IrDocument, Side};

// ============================================================================
// IConverter trait
// ============================================================================

/// Source-to-IR and IR-to-source conversion for one or both sides
#[async_trait::async_trait]
pub trait IConverter: Send + Sync {
    /// Parses the file at `path` (belonging to `side`) into IR
    ///
    /// Must be deterministic: identical file content yields an identical
    /// document.
    async fn convert(&self, side: Side, path: &Path) -> anyhow::Result<IrDocument>;

    /// Renders `ir` as a `side` file at `output`
    ///
    /// Must create parent directories of `output` as needed.
    async fn generate(&self, side: Side, ir: &IrDocument, output: &Path) -> anyhow::Result<()>;
}

// ============================================================================
// ITestConverter trait
// ============================================================================

/// Result of a best-effort test conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestConversion {
    /// Converted test source for the target side
    Converted(String),
    /// Placeholder that needs manual completion
    Stub { content: String, reason: String },
}

impl TestConversion {
    /// Builds a stub marked with a TODO and the reason it was emitted
    pub fn stub(source: &Path, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let content = format!(
            "// TODO: port test from {}\n// Automatic conversion was not possible: {}\n",
            source.display(),
            reason
        );
        TestConversion::Stub { content, reason }
    }

    /// File content to write
    pub fn content(&self) -> &str {
        match self {
            TestConversion::Converted(content) | TestConversion::Stub { content, .. } => content,
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, TestConversion::Stub { .. })
    }
}

/// Converts test files between sides
#[async_trait::async_trait]
pub trait ITestConverter: Send + Sync {
    /// Converts the test at `path` on `source_side` into target-side source
    ///
    /// Implementations must not fail: anything that cannot be converted is
    /// returned as [`TestConversion::Stub`].
    async fn convert_test(&self, source_side: Side, path: &Path) -> TestConversion;
}

// ============================================================================
// ConverterRegistry
// ============================================================================

/// Converters registered per side
///
/// `convert` for a side uses that side's converter; `generate` for a side
/// uses the target side's converter.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<Side, Arc<dyn IConverter>>,
    test_converter: Option<Arc<dyn ITestConverter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one converter for both sides
    pub fn uniform(converter: Arc<dyn IConverter>) -> Self {
        Self::new()
            .with(Side::A, Arc::clone(&converter))
            .with(Side::B, converter)
    }

    /// Registers the converter for `side`
    pub fn with(mut self, side: Side, converter: Arc<dyn IConverter>) -> Self {
        self.converters.insert(side, converter);
        self
    }

    /// Registers the test converter
    pub fn with_test_converter(mut self, converter: Arc<dyn ITestConverter>) -> Self {
        self.test_converter = Some(converter);
        self
    }

    /// Converter for `side`
    ///
    /// # Errors
    /// Returns an error if nothing is registered for the side.
    pub fn for_side(&self, side: Side) -> anyhow::Result<Arc<dyn IConverter>> {
        self.converters
            .get(&side)
            .cloned()
            .ok_or_else(|| anyhow!("no converter registered for side {side}"))
    }

    pub fn test_converter(&self) -> Option<Arc<dyn ITestConverter>> {
        self.test_converter.clone()
    }

    pub fn has(&self, side: Side) -> bool {
        self.converters.contains_key(&side)
    }
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("sides", &self.converters.keys().collect::<Vec<_>>())
            .field("test_converter", &self.test_converter.is_some())
            .finish()
    }
}
