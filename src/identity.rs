//! Test identities and their canonical form.
//!
//! Parameterized test runners append a per-invocation marker to the class
//! name of every parameter set (`com.example.LoginTest[ONLINE]`). A
//! [`TestIdentifier`] keeps the raw name as reported by the device, while
//! [`canonicalize`] collapses all parameter variants of a test onto one
//! logical identity.
//!
//! # Example
//!
//! ```
//! use shardline::identity::{TestIdentifier, canonicalize};
//!
//! let raw = TestIdentifier::new("com.example.LoginTest[ONLINE]", "signIn");
//! let canonical = canonicalize(&raw);
//!
//! assert_eq!(canonical.class_name(), "com.example.LoginTest");
//! assert_eq!(canonical.test_name(), "signIn");
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Characters that may not appear in a serial used as a path segment.
static SERIAL_VALIDATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9_-]").expect("serial validation pattern is valid")
});

/// Identifies a single test method on a device.
///
/// Two identifiers are equal iff both the class name and the test name are
/// equal. Identifiers are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestIdentifier {
    class_name: String,
    test_name: String,
}

impl TestIdentifier {
    /// Creates an identifier from a class (or suite) name and a test name.
    pub fn new(class_name: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            test_name: test_name.into(),
        }
    }

    /// The class or suite component, as reported.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The test method component.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Returns the canonical form of this identifier. See [`canonicalize`].
    pub fn canonical(&self) -> TestIdentifier {
        canonicalize(self)
    }
}

impl fmt::Display for TestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class_name, self.test_name)
    }
}

/// Strips parameterization suffixes from the class name of `test`.
///
/// A parameterization suffix is a bracketed group enclosing at least one
/// character whose closing `]` is the last character of the class name.
/// Brackets nest, so `Foo[list=[1, 2]]` becomes `Foo`. Consecutive terminal
/// groups are all removed, which makes the operation idempotent.
///
/// Surplus closing brackets belong to the group opened by the last `[`, so
/// `Foo[a]]` becomes `Foo`. Brackets that are not the terminal suffix are
/// left alone, as are empty groups. The test name is never altered.
pub fn canonicalize(test: &TestIdentifier) -> TestIdentifier {
    let stripped = strip_parameters(&test.class_name);
    if stripped.len() == test.class_name.len() {
        return test.clone();
    }
    TestIdentifier::new(stripped, test.test_name.clone())
}

fn strip_parameters(class_name: &str) -> &str {
    let mut end = class_name.len();
    while let Some(start) = terminal_group_start(&class_name[..end]) {
        end = start;
    }
    &class_name[..end]
}

/// Byte offset of the `[` opening the bracketed group that ends `name`.
///
/// Brackets are matched with nesting. If the closing brackets outnumber the
/// opening ones, the group starts at the last `[` instead.
fn terminal_group_start(name: &str) -> Option<usize> {
    if !name.ends_with(']') {
        return None;
    }
    let non_empty = |idx: usize| (name.len() - idx > 2).then_some(idx);

    let mut depth = 0usize;
    for (idx, ch) in name.char_indices().rev() {
        match ch {
            ']' => depth += 1,
            '[' => {
                depth -= 1;
                if depth == 0 {
                    return non_empty(idx);
                }
            }
            _ => {}
        }
    }
    name.rfind('[').and_then(non_empty)
}

/// Turns a device serial into a token usable as a single path segment.
///
/// Every character outside `[a-zA-Z0-9_-]` is replaced with `_`, so
/// `10.0.0.1:5555` becomes `10_0_0_1_5555`. Distinct serials may collide.
pub fn sanitize_serial(serial: &str) -> String {
    SERIAL_VALIDATION.replace_all(serial, "_").into_owned()
}
