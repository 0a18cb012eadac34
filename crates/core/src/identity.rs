//! Package identifiers and the grammar that guards them.
//!
//! Every value that ends up as a path component under the repository root
//! passes through one of these types first. The grammar is deliberately
//! narrow: ASCII alphanumerics plus `-`, `_` and `.`, no leading dot and no
//! `..` anywhere, so a validated identifier can never name a parent directory,
//! a hidden entry, or carry a path separator.

use std::fmt;

/// Maximum length of a single identifier.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Check `value` against the identifier grammar.
fn validate(field: &'static str, value: &str) -> crate::Result<()> {
    if value.is_empty() {
        return Err(crate::Error::invalid(field, "cannot be empty"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(crate::Error::invalid(
            field,
            format!(
                "must be at most {MAX_IDENTIFIER_LEN} bytes, got {}",
                value.len()
            ),
        ));
    }
    if value.contains('/') || value.contains('\\') {
        return Err(crate::Error::invalid(
            field,
            "path separators are not allowed",
        ));
    }
    if value.contains("..") {
        return Err(crate::Error::invalid(
            field,
            "parent-directory sequences are not allowed",
        ));
    }
    if value.starts_with('.') {
        return Err(crate::Error::invalid(field, "cannot start with '.'"));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.'))
    {
        return Err(crate::Error::invalid(
            field,
            format!("invalid character {c:?}"),
        ));
    }
    Ok(())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Create from a string, validating it against the identifier grammar.
            pub fn new(value: impl Into<String>) -> crate::Result<Self> {
                let value = value.into();
                validate($field, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

identifier!(
    /// A package name, e.g. `coreutils`.
    PackageName,
    "package name"
);

identifier!(
    /// A target architecture, e.g. `x64` or `aarch64`.
    Arch,
    "architecture"
);

identifier!(
    /// A package version, e.g. `1.0` or `2.4.1-rc1`.
    Version,
    "version"
);

/// A fully-qualified artifact identity: name, architecture and version.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PackageIdentity {
    name: PackageName,
    arch: Arch,
    version: Version,
}

impl PackageIdentity {
    /// Build from already-validated components.
    pub fn new(name: PackageName, arch: Arch, version: Version) -> Self {
        Self {
            name,
            arch,
            version,
        }
    }

    /// Parse and validate raw request parameters.
    pub fn parse(name: &str, arch: &str, version: &str) -> crate::Result<Self> {
        Ok(Self {
            name: PackageName::new(name)?,
            arch: Arch::new(arch)?,
            version: Version::new(version)?,
        })
    }

    pub fn name(&self) -> &PackageName {
        &self.name
    }

    pub fn arch(&self) -> &Arch {
        &self.arch
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// File name presented to clients, `{name}-{version}.{extension}`.
    pub fn download_file_name(&self, extension: &str) -> String {
        format!("{}-{}.{}", self.name, self.version, extension)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.name, self.arch, self.version)
    }
}
