//! Request path parsing
//!
//! Repository names may contain `/`, so paths under `/v2/` are matched from
//! the right: the trailing endpoint segments are recognised first and
//! everything before them is the repository name.

use std::fmt;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};

const MAX_NAME_LEN: usize = 255;
const MAX_TAG_LEN: usize = 128;

/// An endpoint under `/v2/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    /// `/v2/`
    Base,
    /// `/v2/_catalog`
    Catalog,
    /// `/v2/<name>/tags/list`
    Tags { name: &'a str },
    /// `/v2/<name>/blobs/<digest>`
    Blob { name: &'a str, digest: &'a str },
    /// `/v2/<name>/blobs/uploads/`
    Uploads { name: &'a str },
    /// `/v2/<name>/blobs/uploads/<id>`
    Upload { name: &'a str, id: &'a str },
    /// `/v2/<name>/manifests/<reference>`
    Manifest { name: &'a str, reference: &'a str },
}

impl<'a> Route<'a> {
    /// Match the part of a path after `/v2/`.
    pub fn parse(tail: &'a str) -> Option<Self> {
        let tail = tail.trim_start_matches('/');
        if tail.is_empty() {
            return Some(Route::Base);
        }
        if tail == "_catalog" {
            return Some(Route::Catalog);
        }
        if let Some(name) = tail.strip_suffix("/tags/list") {
            return Some(Route::Tags { name });
        }

        let (head, last) = tail.rsplit_once('/')?;
        if let Some(name) = head.strip_suffix("/blobs/uploads") {
            return Some(if last.is_empty() {
                Route::Uploads { name }
            } else {
                Route::Upload { name, id: last }
            });
        }
        if last == "uploads" {
            if let Some(name) = head.strip_suffix("/blobs") {
                return Some(Route::Uploads { name });
            }
        }
        if last.is_empty() {
            return None;
        }
        if let Some(name) = head.strip_suffix("/blobs") {
            return Some(Route::Blob { name, digest: last });
        }
        if let Some(name) = head.strip_suffix("/manifests") {
            return Some(Route::Manifest {
                name,
                reference: last,
            });
        }
        None
    }

    /// Repository the route addresses, if any.
    pub fn repository(&self) -> Option<&'a str> {
        match *self {
            Route::Base | Route::Catalog => None,
            Route::Tags { name }
            | Route::Blob { name, .. }
            | Route::Uploads { name }
            | Route::Upload { name, .. }
            | Route::Manifest { name, .. } => Some(name),
        }
    }
}

/// Check a repository name against the distribution naming rules.
///
/// Each `/`-separated component is lowercase alphanumerics, optionally
/// joined by single `.`, `_` or `-` separators (`__` is also allowed).
pub fn validate_repository(name: &str) -> RegistryResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.split('/').all(valid_component);
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidRepository(name.to_owned()))
    }
}

fn valid_component(component: &str) -> bool {
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let bytes = component.as_bytes();

    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    if !alnum(first) || !alnum(last) {
        return false;
    }

    // The separator run in progress, if any.
    let mut run: Option<(u8, usize)> = None;
    for &b in bytes {
        if alnum(b) {
            run = None;
            continue;
        }
        if !matches!(b, b'.' | b'_' | b'-') {
            return false;
        }
        run = match run {
            None => Some((b, 1)),
            Some((b'_', 1)) if b == b'_' => Some((b, 2)),
            Some(_) => return false,
        };
    }
    true
}

/// A manifest reference: a tag or a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A mutable name.
    Tag(String),
    /// A content address.
    Digest(Digest),
}

impl Reference {
    /// Parse a reference from a path segment.
    ///
    /// Anything containing `:` is treated as a digest.
    pub fn parse(reference: &str) -> RegistryResult<Self> {
        if reference.contains(':') {
            return RegistryError::parse_digest(reference).map(Reference::Digest);
        }

        let bytes = reference.as_bytes();
        let valid = matches!(bytes.first(), Some(b) if b.is_ascii_alphanumeric() || *b == b'_')
            && bytes.len() <= MAX_TAG_LEN
            && bytes
                .iter()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        if valid {
            Ok(Reference::Tag(reference.to_owned()))
        } else {
            Err(RegistryError::InvalidReference(reference.to_owned()))
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tag(tag) => f.write_str(tag),
            Reference::Digest(digest) => write!(f, "{digest}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_names_from_the_right() {
        let cases = [
            ("", Route::Base),
            ("_catalog", Route::Catalog),
            ("foo/bar/tags/list", Route::Tags { name: "foo/bar" }),
            (
                "foo/bar/blobs/sha256:abc",
                Route::Blob {
                    name: "foo/bar",
                    digest: "sha256:abc",
                },
            ),
            ("a/b/c/blobs/uploads/", Route::Uploads { name: "a/b/c" }),
            ("a/blobs/uploads", Route::Uploads { name: "a" }),
            (
                "a/b/blobs/uploads/1234",
                Route::Upload {
                    name: "a/b",
                    id: "1234",
                },
            ),
            (
                "foo/manifests/latest",
                Route::Manifest {
                    name: "foo",
                    reference: "latest",
                },
            ),
        ];

        for (path, expected) in cases {
            assert_eq!(Route::parse(path), Some(expected), "{path}");
        }
    }

    #[test]
    fn unknown_paths_do_not_match() {
        for path in ["foo", "foo/bar", "foo/blobs/", "foo/manifests/", "foo/tags"] {
            assert_eq!(Route::parse(path), None, "{path}");
        }
    }

    #[test]
    fn repository_names() {
        for name in ["foo", "foo/bar", "a0/b-c/d.e", "my__repo", "x_y"] {
            assert!(validate_repository(name).is_ok(), "{name}");
        }
        for name in ["", "Foo", "foo/", "/foo", "foo//bar", "-foo", "foo-", "a..b", "a-_b", "a___b", ".."] {
            assert!(validate_repository(name).is_err(), "{name}");
        }
        assert!(validate_repository(&"a".repeat(256)).is_err());
    }

    #[test]
    fn references() {
        assert_eq!(
            Reference::parse("v1.0_rc-1").unwrap(),
            Reference::Tag("v1.0_rc-1".into())
        );
        assert!(matches!(
            Reference::parse(&Digest::empty().to_string()).unwrap(),
            Reference::Digest(_)
        ));
        assert!(matches!(
            Reference::parse("sha256:short"),
            Err(RegistryError::InvalidDigest { .. })
        ));
        let long = "t".repeat(129);
        for tag in [".hidden", "has space", "-dash", long.as_str()] {
            assert!(
                matches!(Reference::parse(tag), Err(RegistryError::InvalidReference(_))),
                "{tag}"
            );
        }
    }
}
