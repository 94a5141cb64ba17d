use alloc::string::String;
use alloc::vec::Vec;

use core::fmt;

use hashbrown::DefaultHashBuilder;

use indexmap::map::{IndexMap, Values};

use serde::{Serialize, Serializer, ser::SerializeStruct};

use crate::normalize;
use crate::parameters::{ParameterSpec, ParameterSpecs};

/// All [`Method`]s.
pub const ALL_METHODS: &[Method] = &[Method::Get, Method::Post, Method::Put, Method::Delete];

/// The `HTTP`-like method of an API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Retrieves a value.
    Get,
    /// Creates or triggers something.
    Post,
    /// Updates a value or registers an event.
    Put,
    /// Removes a value or unregisters an event.
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl Method {
    /// Returns the upper-case name of the [`Method`].
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Parses a [`Method`] from its name, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_METHODS
            .iter()
            .copied()
            .find(|method| method.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

/// The position of an API inside its profile.
///
/// An API is addressed as `/profile`, `/profile/attribute` or
/// `/profile/interface/attribute`. An interface is never used without an
/// attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ApiPath {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    attribute: Option<String>,
}

impl fmt::Display for ApiPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(interface) = &self.interface {
            write!(f, "/{interface}")?;
        }
        if let Some(attribute) = &self.attribute {
            write!(f, "/{attribute}")?;
        }
        Ok(())
    }
}

impl ApiPath {
    /// Creates the [`ApiPath`] of the profile root.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            interface: None,
            attribute: None,
        }
    }

    /// Creates an [`ApiPath`] made of an attribute.
    #[must_use]
    #[inline]
    pub fn attribute(attribute: &str) -> Self {
        Self {
            interface: None,
            attribute: Some(normalize(attribute)),
        }
    }

    /// Creates an [`ApiPath`] made of an interface and an attribute.
    #[must_use]
    #[inline]
    pub fn interface(interface: &str, attribute: &str) -> Self {
        Self {
            interface: Some(normalize(interface)),
            attribute: Some(normalize(attribute)),
        }
    }

    /// Creates an [`ApiPath`] from optional components.
    ///
    /// Empty components are treated as absent.
    ///
    /// Returns [`None`] when an interface is given without an attribute.
    #[must_use]
    pub fn new(interface: Option<&str>, attribute: Option<&str>) -> Option<Self> {
        let interface = interface.map(normalize).filter(|value| !value.is_empty());
        let attribute = attribute.map(normalize).filter(|value| !value.is_empty());
        if interface.is_some() && attribute.is_none() {
            return None;
        }
        Some(Self {
            interface,
            attribute,
        })
    }

    /// Returns the interface name.
    #[must_use]
    pub fn interface_name(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Returns the attribute name.
    #[must_use]
    pub fn attribute_name(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// Checks whether the [`ApiPath`] is well-formed.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !(self.interface.is_some() && self.attribute.is_none())
    }
}

/// The exact-match key of an API inside a profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ApiKey {
    /// API method.
    pub method: Method,
    /// API path.
    #[serde(flatten)]
    pub path: ApiPath,
}

impl ApiKey {
    /// Creates an [`ApiKey`].
    #[must_use]
    pub const fn new(method: Method, path: ApiPath) -> Self {
        Self { method, path }
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path == ApiPath::root() {
            write!(f, "{} /", self.method)
        } else {
            write!(f, "{} {}", self.method, self.path)
        }
    }
}

/// The declarative description of a single API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ApiSpec {
    method: Method,
    #[serde(flatten)]
    path: ApiPath,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    description: Option<String>,
    #[serde(skip_serializing_if = "ParameterSpecs::is_empty", default)]
    parameters: ParameterSpecs,
    #[serde(skip_serializing_if = "core::ops::Not::not", default)]
    event: bool,
}

impl ApiSpec {
    /// Creates an [`ApiSpec`] through a `GET` API.
    #[must_use]
    #[inline]
    pub fn get(path: ApiPath) -> Self {
        Self::init(Method::Get, path)
    }

    /// Creates an [`ApiSpec`] through a `POST` API.
    #[must_use]
    #[inline]
    pub fn post(path: ApiPath) -> Self {
        Self::init(Method::Post, path)
    }

    /// Creates an [`ApiSpec`] through a `PUT` API.
    #[must_use]
    #[inline]
    pub fn put(path: ApiPath) -> Self {
        Self::init(Method::Put, path)
    }

    /// Creates an [`ApiSpec`] through a `DELETE` API.
    #[must_use]
    #[inline]
    pub fn delete(path: ApiPath) -> Self {
        Self::init(Method::Delete, path)
    }

    /// Sets the API description.
    #[must_use]
    #[inline]
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(String::from(description));
        self
    }

    /// Sets the API [`ParameterSpecs`].
    #[must_use]
    #[inline]
    pub fn with_parameters(mut self, parameters: ParameterSpecs) -> Self {
        self.parameters = parameters;
        self
    }

    /// Adds a single parameter to the API.
    #[must_use]
    #[inline]
    pub fn with_parameter(mut self, name: &str, spec: ParameterSpec) -> Self {
        self.parameters = self.parameters.parameter(name, spec);
        self
    }

    /// Marks the API as an event API.
    ///
    /// A `PUT` on an event API registers a subscription, a `DELETE`
    /// unregisters it.
    #[must_use]
    #[inline]
    pub const fn event(mut self) -> Self {
        self.event = true;
        self
    }

    /// Returns the [`ApiKey`].
    #[must_use]
    #[inline]
    pub fn key(&self) -> ApiKey {
        ApiKey::new(self.method, self.path.clone())
    }

    /// Returns the [`Method`].
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Returns the [`ApiPath`].
    #[must_use]
    pub const fn path(&self) -> &ApiPath {
        &self.path
    }

    /// Returns the API description.
    #[must_use]
    pub fn description_text(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the API [`ParameterSpecs`].
    #[must_use]
    pub const fn parameters(&self) -> &ParameterSpecs {
        &self.parameters
    }

    /// Checks whether the API is an event API.
    #[must_use]
    pub const fn is_event(&self) -> bool {
        self.event
    }

    fn init(method: Method, path: ApiPath) -> Self {
        Self {
            method,
            path,
            description: None,
            parameters: ParameterSpecs::new(),
            event: false,
        }
    }
}

/// An error raised while building a [`ProfileSpec`].
#[derive(Debug, Clone, PartialEq)]
pub enum SpecError {
    /// Two APIs share the same [`ApiKey`].
    DuplicateApi {
        /// Profile name.
        profile: String,
        /// The duplicated key.
        key: ApiKey,
    },
    /// An API path uses an interface without an attribute.
    InvalidPath {
        /// Profile name.
        profile: String,
        /// The malformed key.
        key: ApiKey,
    },
    /// The profile name is empty.
    EmptyProfileName,
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateApi { profile, key } => {
                write!(f, "The API `{key}` is already registered on profile `{profile}`")
            }
            Self::InvalidPath { profile, key } => write!(
                f,
                "The API `{key}` on profile `{profile}` has an interface without an attribute"
            ),
            Self::EmptyProfileName => "The profile name is empty".fmt(f),
        }
    }
}

impl core::error::Error for SpecError {}

/// The declarative description of a profile and its APIs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "deserialize",
    derive(serde::Deserialize),
    serde(try_from = "ProfileSchema")
)]
pub struct ProfileSpec {
    name: String,
    apis: IndexMap<ApiKey, ApiSpec, DefaultHashBuilder>,
}

impl ProfileSpec {
    /// Creates a [`ProfileSpec`] without APIs.
    ///
    /// Profile names are case-insensitive and stored in lower case.
    #[must_use]
    #[inline]
    pub fn new(name: &str) -> Self {
        Self {
            name: normalize(name),
            apis: IndexMap::with_hasher(DefaultHashBuilder::default()),
        }
    }

    /// Adds an [`ApiSpec`] to the [`ProfileSpec`].
    ///
    /// # Errors
    ///
    /// Fails when another API with the same [`ApiKey`] exists, or when the
    /// API path is malformed.
    #[inline]
    pub fn add(mut self, spec: ApiSpec) -> Result<Self, SpecError> {
        self.insert(spec)?;
        Ok(self)
    }

    /// Inserts an [`ApiSpec`] into the [`ProfileSpec`].
    ///
    /// # Errors
    ///
    /// Fails when another API with the same [`ApiKey`] exists, or when the
    /// API path is malformed.
    pub fn insert(&mut self, spec: ApiSpec) -> Result<(), SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::EmptyProfileName);
        }

        let key = spec.key();
        if !key.path.is_valid() {
            return Err(SpecError::InvalidPath {
                profile: self.name.clone(),
                key,
            });
        }

        if self.apis.contains_key(&key) {
            return Err(SpecError::DuplicateApi {
                profile: self.name.clone(),
                key,
            });
        }

        let _ = self.apis.insert(key, spec);
        Ok(())
    }

    /// Returns the profile name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the [`ApiSpec`] registered with the given [`ApiKey`].
    #[must_use]
    #[inline]
    pub fn get(&self, key: &ApiKey) -> Option<&ApiSpec> {
        self.apis.get(key)
    }

    /// Returns the methods registered for the given [`ApiPath`].
    #[must_use]
    pub fn allowed_methods(&self, path: &ApiPath) -> Vec<Method> {
        let mut methods = self
            .apis
            .keys()
            .filter(|key| &key.path == path)
            .map(|key| key.method)
            .collect::<Vec<_>>();
        methods.sort_unstable();
        methods
    }

    /// Returns an iterator over the [`ApiSpec`]s, in registration order.
    #[inline]
    pub fn iter(&self) -> Values<'_, ApiKey, ApiSpec> {
        self.apis.values()
    }

    /// Checks whether the profile has no APIs.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }

    /// Returns the number of APIs.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.apis.len()
    }
}

impl Serialize for ProfileSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ProfileSpec", 2)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("apis", &self.apis.values().collect::<Vec<_>>())?;
        state.end()
    }
}

// The on-the-wire shape of a profile schema document.
#[cfg(feature = "deserialize")]
#[derive(serde::Deserialize)]
struct ProfileSchema {
    name: String,
    #[serde(default)]
    apis: Vec<ApiSpec>,
}

#[cfg(feature = "deserialize")]
impl TryFrom<ProfileSchema> for ProfileSpec {
    type Error = SpecError;

    fn try_from(schema: ProfileSchema) -> Result<Self, Self::Error> {
        let mut spec = Self::new(&schema.name);
        if spec.name.is_empty() {
            return Err(SpecError::EmptyProfileName);
        }
        for api in schema.apis {
            spec.insert(api)?;
        }
        Ok(spec)
    }
}
