//! Static method-name resolution.
//!
//! Interceptors receive the full RPC path (`/pkg.Service/Method`). A
//! [`MethodDescriptorMap`] built at registration time resolves that path to
//! an application-defined descriptor keyed by the short method name.
//!
//! # Example
//!
//! ```
//! use twinport_core::MethodDescriptorMap;
//!
//! #[derive(Debug, PartialEq)]
//! struct Policy { public: bool }
//!
//! let map = MethodDescriptorMap::new([
//!     ("GetPhoto", Policy { public: true }),
//!     ("DeletePhoto", Policy { public: false }),
//! ])
//! .unwrap();
//!
//! let policy = map.resolve("/photos.v1.Photos/GetPhoto").unwrap();
//! assert!(policy.public);
//! ```

use std::collections::HashMap;

use thiserror::Error;

/// Errors from building or querying a [`MethodDescriptorMap`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MethodError {
    /// No descriptor is registered for the method.
    #[error("method descriptor not found: {full_name}")]
    DescriptorNotFound {
        /// The full method name that was looked up.
        full_name: String,
    },

    /// Two descriptors were registered under the same short name.
    #[error("duplicate method descriptor: {name}")]
    Duplicate {
        /// The duplicated short name.
        name: String,
    },
}

/// Returns the short method name: the last `/`-separated segment.
///
/// ```
/// assert_eq!(twinport_core::method::short_name("/a.B/Get"), "Get");
/// assert_eq!(twinport_core::method::short_name("Get"), "Get");
/// ```
#[must_use]
pub fn short_name(full_name: &str) -> &str {
    full_name.rsplit('/').next().unwrap_or(full_name)
}

/// Returns the service part of a full method path, or `""` if there is none.
#[must_use]
pub fn service_name(full_name: &str) -> &str {
    let trimmed = full_name.strip_prefix('/').unwrap_or(full_name);
    trimmed.rsplit_once('/').map_or("", |(service, _)| service)
}

/// Short method name → descriptor table.
#[derive(Debug, Clone)]
pub struct MethodDescriptorMap<D> {
    entries: HashMap<&'static str, D>,
}

impl<D> MethodDescriptorMap<D> {
    /// Builds the table, rejecting duplicate short names.
    pub fn new<I>(entries: I) -> Result<Self, MethodError>
    where
        I: IntoIterator<Item = (&'static str, D)>,
    {
        let mut map = HashMap::new();
        for (name, descriptor) in entries {
            if map.insert(name, descriptor).is_some() {
                return Err(MethodError::Duplicate {
                    name: name.to_string(),
                });
            }
        }
        Ok(Self { entries: map })
    }

    /// Looks up a descriptor by short name.
    #[must_use]
    pub fn get(&self, short: &str) -> Option<&D> {
        self.entries.get(short)
    }

    /// Looks up a descriptor by full method path.
    #[must_use]
    pub fn get_by_full_name(&self, full_name: &str) -> Option<&D> {
        self.get(short_name(full_name))
    }

    /// Like [`get_by_full_name`](Self::get_by_full_name) but fails with
    /// [`MethodError::DescriptorNotFound`].
    pub fn resolve(&self, full_name: &str) -> Result<&D, MethodError> {
        self.get_by_full_name(full_name)
            .ok_or_else(|| MethodError::DescriptorNotFound {
                full_name: full_name.to_string(),
            })
    }

    /// Returns the number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the registered short names.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}
