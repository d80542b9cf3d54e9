//! Source-position tags for posted tasks
//!
//! Every task remembers where it was posted from. The tag is carried into
//! logs (a panicking task is reported by its posting site) and into the
//! per-location run profile.

use std::fmt;

/// Where a task was posted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    file: &'static str,
    line: u32,
    column: u32,
    module: Option<&'static str>,
}

impl Location {
    /// Create a location from its parts
    pub const fn new(file: &'static str, line: u32, column: u32) -> Self {
        Self {
            file,
            line,
            column,
            module: None,
        }
    }

    /// Attach the enclosing module path (see [`from_here!`](crate::from_here))
    pub const fn with_module(mut self, module: &'static str) -> Self {
        self.module = Some(module);
        self
    }

    /// Location of the caller of the `#[track_caller]` function invoking this
    #[track_caller]
    pub fn caller() -> Self {
        std::panic::Location::caller().into()
    }

    /// Source file
    pub fn file(&self) -> &'static str {
        self.file
    }

    /// Line number (1-based)
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Column number (1-based)
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Module path, if recorded
    pub fn module(&self) -> Option<&'static str> {
        self.module
    }
}

impl From<&'static std::panic::Location<'static>> for Location {
    fn from(location: &'static std::panic::Location<'static>) -> Self {
        Self::new(location.file(), location.line(), location.column())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.module {
            Some(module) => write!(f, "{}@{}:{}:{}", module, self.file, self.line, self.column),
            None => write!(f, "{}:{}:{}", self.file, self.line, self.column),
        }
    }
}

/// Build a [`Location`] for the current source position.
///
/// ```rust,ignore
/// scheduler.post_task_with_traits(from_here!(), TaskTraits::new(), Box::new(|| {}));
/// ```
#[macro_export]
macro_rules! from_here {
    () => {
        $crate::Location::new(file!(), line!(), column!()).with_module(module_path!())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn posted_from() -> Location {
        Location::caller()
    }

    #[test]
    fn test_caller_points_at_call_site() {
        let expected_line = line!() + 1;
        let location = posted_from();
        assert_eq!(location.line(), expected_line);
        assert!(location.file().ends_with("location.rs"));
        assert_eq!(location.module(), None);
    }

    #[test]
    fn test_from_here_records_module() {
        let location = crate::from_here!();
        assert_eq!(location.module(), Some(module_path!()));
        assert!(location.to_string().starts_with("tasksched::location::tests@"));
    }
}
