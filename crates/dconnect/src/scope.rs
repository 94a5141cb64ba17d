use alloc::string::String;

use core::fmt;

use hashbrown::DefaultHashBuilder;

use indexmap::set::{IndexSet, IntoIter, Iter};

use serde::{Serialize, Serializer};

use crate::macros::set;
use crate::normalize;

/// The separator between a service identifier and a profile name in the
/// textual form of a [`Scope`].
pub const SERVICE_SEPARATOR: char = ':';

/// A permission unit granted to an access token.
///
/// A scope names a profile, optionally qualified by the service identifier
/// on which the profile is granted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Grants the profile on every service.
    Profile(String),
    /// Grants the profile only on the given service.
    Service {
        /// Service identifier.
        service_id: String,
        /// Profile name.
        profile: String,
    },
}

impl Scope {
    /// Creates a [`Scope`] granting a profile on every service.
    #[must_use]
    #[inline]
    pub fn profile(profile: &str) -> Self {
        Self::Profile(normalize(profile))
    }

    /// Creates a [`Scope`] granting a profile only on a single service.
    #[must_use]
    #[inline]
    pub fn service(service_id: &str, profile: &str) -> Self {
        Self::Service {
            service_id: String::from(service_id.trim()),
            profile: normalize(profile),
        }
    }

    /// Parses a [`Scope`] from its textual form, either `profile` or
    /// `service_id:profile`.
    ///
    /// Service identifiers may themselves contain the separator, so the
    /// string is split on its **last** separator.
    ///
    /// Returns [`None`] when the profile name is empty.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let scope = match value.rsplit_once(SERVICE_SEPARATOR) {
            Some((service_id, profile)) if !service_id.trim().is_empty() => {
                Self::service(service_id, profile)
            }
            Some((_, profile)) => Self::profile(profile),
            None => Self::profile(value),
        };
        (!scope.profile_name().is_empty()).then_some(scope)
    }

    /// Returns the profile name of the [`Scope`].
    #[must_use]
    pub fn profile_name(&self) -> &str {
        match self {
            Self::Profile(profile) | Self::Service { profile, .. } => profile,
        }
    }

    /// Returns the service identifier of a service-qualified [`Scope`].
    #[must_use]
    pub fn service_id(&self) -> Option<&str> {
        match self {
            Self::Profile(_) => None,
            Self::Service { service_id, .. } => Some(service_id),
        }
    }

    /// Checks whether the [`Scope`] grants access to the given profile on
    /// the given service.
    ///
    /// A request without a service identifier is only granted by a
    /// profile-wide scope.
    #[must_use]
    pub fn grants(&self, service_id: Option<&str>, profile: &str) -> bool {
        match self {
            Self::Profile(granted) => granted == profile,
            Self::Service {
                service_id: granted_service,
                profile: granted,
            } => granted == profile && service_id == Some(granted_service.as_str()),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile(profile) => profile.fmt(f),
            Self::Service {
                service_id,
                profile,
            } => write!(f, "{service_id}{SERVICE_SEPARATOR}{profile}"),
        }
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "deserialize")]
impl<'de> serde::Deserialize<'de> for Scope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <alloc::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        Self::parse(&value)
            .ok_or_else(|| serde::de::Error::custom(alloc::format!("invalid scope `{value}`")))
    }
}

set! {
  /// A collection of [`Scope`]s.
  #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
  #[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
  pub struct Scopes(IndexSet<Scope, DefaultHashBuilder>);
}

impl Scopes {
    /// Constructs [`Scopes`] from an array of [`Scope`]s.
    #[must_use]
    #[inline]
    pub fn init_from_scopes<const N: usize>(input_elements: [Scope; N]) -> Self {
        input_elements.into_iter().collect()
    }

    /// Parses [`Scopes`] from a comma-separated list.
    ///
    /// Empty entries are skipped.
    #[must_use]
    pub fn parse_list(value: &str) -> Self {
        value.split(',').filter_map(Scope::parse).collect()
    }

    /// Checks whether any of the [`Scopes`] grants access to the given
    /// profile on the given service.
    #[must_use]
    pub fn grants(&self, service_id: Option<&str>, profile: &str) -> bool {
        self.iter().any(|scope| scope.grants(service_id, profile))
    }

    /// Returns the [`Scopes`] contained in both `self` and `other`.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        self.iter()
            .filter(|scope| other.contains(scope))
            .cloned()
            .collect()
    }
}
