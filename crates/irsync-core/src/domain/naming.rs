//! Path naming and side-to-side path mapping
//!
//! Each side has its own root directory, file extension and file-naming
//! convention. [`PathMapper`] derives IR ids and counterpart paths from these
//! so that the same relative location always maps to the same id and the same
//! generated file.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{IrId, Side};

// ============================================================================
// NamingConvention
// ============================================================================

/// Case convention applied to generated file stems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingConvention {
    /// Keep the stem as-is
    #[default]
    Preserve,
    /// `button_group`
    SnakeCase,
    /// `ButtonGroup`
    PascalCase,
    /// `buttonGroup`
    CamelCase,
    /// `button-group`
    KebabCase,
}

impl NamingConvention {
    /// Applies the convention to a file stem
    pub fn apply(self, stem: &str) -> String {
        if self == NamingConvention::Preserve {
            return stem.to_string();
        }
        let words = split_words(stem);
        if words.is_empty() {
            return stem.to_string();
        }
        match self {
            NamingConvention::Preserve => stem.to_string(),
            NamingConvention::SnakeCase => words.join("_"),
            NamingConvention::KebabCase => words.join("-"),
            NamingConvention::PascalCase => words.iter().map(|w| capitalize(w)).collect(),
            NamingConvention::CamelCase => {
                let mut out = words[0].clone();
                for w in &words[1..] {
                    out.push_str(&capitalize(w));
                }
                out
            }
        }
    }
}

/// Splits an identifier into lowercase words
///
/// Separators are any non-alphanumeric character; case boundaries split
/// `fooBar`, `Foo2Bar` and acronyms such as `HTMLParser` (`html`, `parser`).
fn split_words(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                words.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// PathMapper
// ============================================================================

/// Root, extension and naming of one side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideLayout {
    pub root: PathBuf,
    /// Extension of generated files, without the leading dot
    pub extension: String,
    pub naming: NamingConvention,
}

impl SideLayout {
    pub fn new(root: impl Into<PathBuf>, extension: &str, naming: NamingConvention) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
            naming,
        }
    }
}

/// Maps files between the two sides
#[derive(Debug, Clone)]
pub struct PathMapper {
    a: SideLayout,
    b: SideLayout,
}

/// Directory names whose contents are treated as tests
const TEST_DIRS: &[&str] = &["test", "tests", "__tests__", "spec", "specs"];

/// Stem suffixes and prefixes that mark a test file
const TEST_SUFFIXES: &[&str] = &[".test", ".spec", "_test", "_spec", "-test", "-spec"];
const TEST_PREFIXES: &[&str] = &["test_", "spec_"];

impl PathMapper {
    pub fn new(a: SideLayout, b: SideLayout) -> Self {
        Self { a, b }
    }

    pub fn layout(&self, side: Side) -> &SideLayout {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    pub fn root(&self, side: Side) -> &Path {
        &self.layout(side).root
    }

    /// Returns the side whose root contains `path`, if any
    pub fn side_of(&self, path: &Path) -> Option<Side> {
        Side::ALL
            .into_iter()
            .find(|side| path.starts_with(self.root(*side)))
    }

    /// Path of `path` relative to its side's root
    ///
    /// # Errors
    /// Returns [`DomainError::PathNotInRoot`] if `path` is outside the root.
    pub fn relative(&self, side: Side, path: &Path) -> Result<PathBuf, DomainError> {
        path.strip_prefix(self.root(side))
            .map(Path::to_path_buf)
            .map_err(|_| DomainError::PathNotInRoot(path.display().to_string()))
    }

    /// IR id for `path` on `side`
    ///
    /// # Errors
    /// Returns an error if the path is outside the root or has no file name.
    pub fn ir_id(&self, side: Side, path: &Path) -> Result<IrId, DomainError> {
        let relative = self.relative(side, path)?;
        IrId::derive(side, &relative)
    }

    /// Path of the file generated on the opposite side for `path`
    ///
    /// Directory components are kept; only the file stem is renamed with the
    /// target side's naming convention and given its extension.
    ///
    /// # Errors
    /// Returns an error if the path is outside the root or has no file name.
    pub fn counterpart(&self, side: Side, path: &Path) -> Result<PathBuf, DomainError> {
        let relative = self.relative(side, path)?;
        let stem = relative
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| DomainError::InvalidPath(path.display().to_string()))?;

        let target = self.layout(side.opposite());
        let mut file_name = target.naming.apply(&stem);
        if !target.extension.is_empty() {
            file_name.push('.');
            file_name.push_str(&target.extension);
        }

        let mut out = target.root.clone();
        if let Some(parent) = relative.parent() {
            out.push(parent);
        }
        out.push(file_name);
        Ok(out)
    }

    /// Returns true for files following test/spec naming conventions
    pub fn is_test_file(path: &Path) -> bool {
        let in_test_dir = path.parent().is_some_and(|parent| {
            parent.components().any(|c| match c {
                Component::Normal(name) => TEST_DIRS.contains(&name.to_string_lossy().as_ref()),
                _ => false,
            })
        });
        if in_test_dir {
            return true;
        }

        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_lowercase()) else {
            return false;
        };
        TEST_SUFFIXES.iter().any(|s| stem.ends_with(s))
            || TEST_PREFIXES.iter().any(|p| stem.starts_with(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> PathMapper {
        PathMapper::new(
            SideLayout::new("/proj/web", "tsx", NamingConvention::PascalCase),
            SideLayout::new("/proj/app", ".dart", NamingConvention::SnakeCase),
        )
    }

    #[test]
    fn test_naming_conventions() {
        assert_eq!(NamingConvention::SnakeCase.apply("ButtonGroup"), "button_group");
        assert_eq!(NamingConvention::PascalCase.apply("button_group"), "ButtonGroup");
        assert_eq!(NamingConvention::CamelCase.apply("button-group"), "buttonGroup");
        assert_eq!(NamingConvention::KebabCase.apply("ButtonGroup"), "button-group");
        assert_eq!(NamingConvention::Preserve.apply("Button_group"), "Button_group");
    }

    #[test]
    fn test_split_words_handles_acronyms_and_digits() {
        assert_eq!(split_words("HTMLParser"), vec!["html", "parser"]);
        assert_eq!(split_words("Button2Group"), vec!["button2", "group"]);
        assert_eq!(split_words("Button.test"), vec!["button", "test"]);
    }

    #[test]
    fn test_counterpart_maps_both_ways() {
        let mapper = mapper();
        let b = mapper
            .counterpart(Side::A, Path::new("/proj/web/components/ButtonGroup.tsx"))
            .unwrap();
        assert_eq!(b, PathBuf::from("/proj/app/components/button_group.dart"));

        let a = mapper.counterpart(Side::B, &b).unwrap();
        assert_eq!(a, PathBuf::from("/proj/web/components/ButtonGroup.tsx"));
    }

    #[test]
    fn test_counterpart_of_test_file() {
        let mapper = mapper();
        let b = mapper
            .counterpart(Side::A, Path::new("/proj/web/Button.test.tsx"))
            .unwrap();
        assert_eq!(b, PathBuf::from("/proj/app/button_test.dart"));
    }

    #[test]
    fn test_ir_id_and_relative() {
        let mapper = mapper();
        let id = mapper
            .ir_id(Side::A, Path::new("/proj/web/components/Button.tsx"))
            .unwrap();
        assert_eq!(id.as_str(), "a/components/Button");

        let err = mapper
            .relative(Side::B, Path::new("/elsewhere/x.dart"))
            .unwrap_err();
        assert!(matches!(err, DomainError::PathNotInRoot(_)));
    }

    #[test]
    fn test_side_of() {
        let mapper = mapper();
        assert_eq!(mapper.side_of(Path::new("/proj/web/a.tsx")), Some(Side::A));
        assert_eq!(mapper.side_of(Path::new("/proj/app/a.dart")), Some(Side::B));
        assert_eq!(mapper.side_of(Path::new("/proj/other/a.dart")), None);
    }

    #[test]
    fn test_is_test_file() {
        assert!(PathMapper::is_test_file(Path::new("/w/Button.test.tsx")));
        assert!(PathMapper::is_test_file(Path::new("/w/button_test.dart")));
        assert!(PathMapper::is_test_file(Path::new("/w/__tests__/Button.tsx")));
        assert!(PathMapper::is_test_file(Path::new("/w/test_utils.py")));
        assert!(!PathMapper::is_test_file(Path::new("/w/Button.tsx")));
        assert!(!PathMapper::is_test_file(Path::new("/w/contest.tsx")));
    }
}
