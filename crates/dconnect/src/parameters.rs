use alloc::string::{String, ToString};
use alloc::vec::Vec;

use core::fmt;

use hashbrown::DefaultHashBuilder;

use indexmap::map::{IndexMap, IntoIter, Iter};

use serde::Serialize;

// Narrows a float into an integer only when no information is lost.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
fn integral(value: f64) -> Option<i64> {
    if !value.is_finite() || value < i64::MIN as f64 || value >= i64::MAX as f64 {
        return None;
    }
    let narrowed = value as i64;
    (narrowed as f64 == value).then_some(narrowed)
}

/// The primitive kinds an array parameter can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    /// A signed integer.
    Integer,
    /// A floating-point number.
    Float,
    /// A sequence of characters.
    String,
    /// A boolean.
    Boolean,
}

impl PrimitiveKind {
    /// Returns the name of the [`PrimitiveKind`].
    #[must_use]
    pub const fn as_type(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Boolean => "boolean",
        }
    }

    /// Coerces a [`ParameterValue`] into this [`PrimitiveKind`].
    ///
    /// Returns [`None`] when the value cannot be represented as this kind.
    #[must_use]
    pub fn coerce(&self, value: &ParameterValue) -> Option<ParameterValue> {
        match (self, value) {
            (Self::Integer, ParameterValue::Integer(v)) => Some(ParameterValue::Integer(*v)),
            (Self::Integer, ParameterValue::Float(v)) => integral(*v).map(ParameterValue::Integer),
            (Self::Integer, ParameterValue::String(v)) => {
                v.trim().parse::<i64>().ok().map(ParameterValue::Integer)
            }
            (Self::Float, ParameterValue::Float(v)) => Some(ParameterValue::Float(*v)),
            #[allow(clippy::cast_precision_loss)]
            (Self::Float, ParameterValue::Integer(v)) => Some(ParameterValue::Float(*v as f64)),
            (Self::Float, ParameterValue::String(v)) => v
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(ParameterValue::Float),
            (Self::Boolean, ParameterValue::Boolean(v)) => Some(ParameterValue::Boolean(*v)),
            (Self::Boolean, ParameterValue::String(v)) => match v.trim() {
                "true" => Some(ParameterValue::Boolean(true)),
                "false" => Some(ParameterValue::Boolean(false)),
                _ => None,
            },
            (Self::String, ParameterValue::String(v)) => Some(ParameterValue::String(v.clone())),
            (Self::String, ParameterValue::Integer(v)) => {
                Some(ParameterValue::String(v.to_string()))
            }
            (Self::String, ParameterValue::Float(v)) => Some(ParameterValue::String(v.to_string())),
            (Self::String, ParameterValue::Boolean(v)) => {
                Some(ParameterValue::String(v.to_string()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_type().fmt(f)
    }
}

/// All supported kinds of an API parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    /// A signed integer.
    Integer,
    /// A floating-point number.
    Float,
    /// A sequence of characters.
    String,
    /// A boolean.
    Boolean,
    /// An array of primitive values.
    Array(PrimitiveKind),
}

impl ParameterKind {
    /// Returns the name of the [`ParameterKind`].
    #[must_use]
    pub const fn as_type(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Array(PrimitiveKind::Integer) => "array of integer",
            Self::Array(PrimitiveKind::Float) => "array of float",
            Self::Array(PrimitiveKind::String) => "array of string",
            Self::Array(PrimitiveKind::Boolean) => "array of boolean",
        }
    }

    /// Coerces a [`ParameterValue`] into this [`ParameterKind`].
    ///
    /// Arrays are coerced element by element. A single string is split on
    /// commas when an array is expected, since query strings carry arrays in
    /// that form.
    ///
    /// Returns [`None`] when the value cannot be represented as this kind.
    #[must_use]
    pub fn coerce(&self, value: &ParameterValue) -> Option<ParameterValue> {
        match self {
            Self::Integer => PrimitiveKind::Integer.coerce(value),
            Self::Float => PrimitiveKind::Float.coerce(value),
            Self::String => PrimitiveKind::String.coerce(value),
            Self::Boolean => PrimitiveKind::Boolean.coerce(value),
            Self::Array(kind) => match value {
                ParameterValue::Array(values) => values
                    .iter()
                    .map(|value| kind.coerce(value))
                    .collect::<Option<Vec<_>>>()
                    .map(ParameterValue::Array),
                ParameterValue::String(value) if value.is_empty() => {
                    Some(ParameterValue::Array(Vec::new()))
                }
                ParameterValue::String(value) => value
                    .split(',')
                    .map(|element| kind.coerce(&ParameterValue::String(String::from(element))))
                    .collect::<Option<Vec<_>>>()
                    .map(ParameterValue::Array),
                _ => None,
            },
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_type().fmt(f)
    }
}

/// The schema of a single API parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ParameterSpec {
    /// Parameter kind.
    pub kind: ParameterKind,
    /// Whether the parameter must be present in a request.
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    /// Creates a mandatory [`ParameterSpec`].
    #[must_use]
    pub const fn required(kind: ParameterKind) -> Self {
        Self {
            kind,
            required: true,
        }
    }

    /// Creates an optional [`ParameterSpec`].
    #[must_use]
    pub const fn optional(kind: ParameterKind) -> Self {
        Self {
            kind,
            required: false,
        }
    }
}

/// The reason why a parameter has been rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterErrorKind {
    /// A mandatory parameter is missing.
    Missing,
    /// A parameter cannot be coerced into its declared kind.
    Mismatch {
        /// The declared kind.
        expected: ParameterKind,
        /// The type of the received value.
        found: &'static str,
    },
}

/// A parameter rejected while validating a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterError {
    /// The name of the offending parameter.
    pub name: String,
    /// Why the parameter has been rejected.
    pub kind: ParameterErrorKind,
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ParameterErrorKind::Missing => {
                write!(f, "Missing mandatory parameter `{}`", self.name)
            }
            ParameterErrorKind::Mismatch { expected, found } => write!(
                f,
                "Found type `{found}` for `{}`, expected type `{expected}`",
                self.name
            ),
        }
    }
}

impl core::error::Error for ParameterError {}

/// The parameter schema of an API.
///
/// Parameters are kept in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ParameterSpecs(IndexMap<String, ParameterSpec, DefaultHashBuilder>);

impl Default for ParameterSpecs {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterSpecs {
    /// Creates an empty [`ParameterSpecs`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self(IndexMap::with_hasher(DefaultHashBuilder::default()))
    }

    /// Adds a mandatory parameter.
    #[must_use]
    #[inline]
    pub fn required(self, name: &str, kind: ParameterKind) -> Self {
        self.parameter(name, ParameterSpec::required(kind))
    }

    /// Adds an optional parameter.
    #[must_use]
    #[inline]
    pub fn optional(self, name: &str, kind: ParameterKind) -> Self {
        self.parameter(name, ParameterSpec::optional(kind))
    }

    /// Adds a parameter with the given [`ParameterSpec`].
    ///
    /// A parameter with the same name is replaced.
    #[must_use]
    #[inline]
    pub fn parameter(mut self, name: &str, spec: ParameterSpec) -> Self {
        if self.0.insert(String::from(name), spec).is_some() {
            log::warn!("The parameter `{name}` has been declared twice, the last declaration wins");
        }
        self
    }

    /// Returns the [`ParameterSpec`] of the given parameter.
    #[must_use]
    #[inline]
    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.0.get(name)
    }

    /// Returns the names of all declared parameters.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns the names of the mandatory parameters.
    pub fn required_names(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
    }

    /// Returns an iterator over the parameters, in declaration order.
    #[inline]
    pub fn iter(&self) -> Iter<'_, String, ParameterSpec> {
        self.0.iter()
    }

    /// Checks whether no parameters are declared.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of declared parameters.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Validates the given [`ParametersValues`] against the schema.
    ///
    /// Every mandatory parameter must be present and every declared
    /// parameter must be coercible into its kind. The returned values carry
    /// the coerced representation. Parameters which are not declared are
    /// passed through untouched.
    ///
    /// # Errors
    ///
    /// Returns the first [`ParameterError`] found, in declaration order.
    pub fn validate(&self, values: &ParametersValues) -> Result<ParametersValues, ParameterError> {
        let mut validated = ParametersValues::new();

        for (name, spec) in &self.0 {
            let Some(value) = values.get(name) else {
                if spec.required {
                    return Err(ParameterError {
                        name: name.clone(),
                        kind: ParameterErrorKind::Missing,
                    });
                }
                continue;
            };

            let coerced = spec.kind.coerce(value).ok_or_else(|| ParameterError {
                name: name.clone(),
                kind: ParameterErrorKind::Mismatch {
                    expected: spec.kind,
                    found: value.as_type(),
                },
            })?;

            validated.set(name, coerced);
        }

        for (name, value) in values {
            if !self.0.contains_key(name) {
                validated.set(name, value.clone());
            }
        }

        Ok(validated)
    }
}

/// The value of a request parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(untagged)]
pub enum ParameterValue {
    /// A boolean.
    Boolean(bool),
    /// A signed integer.
    Integer(i64),
    /// A floating-point number.
    Float(f64),
    /// A sequence of characters.
    String(String),
    /// An array of values.
    Array(Vec<ParameterValue>),
}

impl ParameterValue {
    /// Returns the type name of the [`ParameterValue`].
    #[must_use]
    pub const fn as_type(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
        }
    }

    /// Returns the boolean value, if any.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the integer value, if any.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the floating-point value, if any.
    ///
    /// Integers are widened.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns the string value, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the array elements, if any.
    #[must_use]
    pub fn as_array(&self) -> Option<&[ParameterValue]> {
        match self {
            Self::Array(values) => Some(values),
            _ => None,
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::String(String::from(value))
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// The parameters of a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ParametersValues(IndexMap<String, ParameterValue, DefaultHashBuilder>);

impl Default for ParametersValues {
    fn default() -> Self {
        Self::new()
    }
}

impl ParametersValues {
    /// Creates an empty [`ParametersValues`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self(IndexMap::with_hasher(DefaultHashBuilder::default()))
    }

    /// Adds a boolean parameter.
    #[must_use]
    #[inline]
    pub fn boolean(self, name: &str, value: bool) -> Self {
        self.with(name, ParameterValue::Boolean(value))
    }

    /// Adds an integer parameter.
    #[must_use]
    #[inline]
    pub fn integer(self, name: &str, value: i64) -> Self {
        self.with(name, ParameterValue::Integer(value))
    }

    /// Adds a floating-point parameter.
    #[must_use]
    #[inline]
    pub fn float(self, name: &str, value: f64) -> Self {
        self.with(name, ParameterValue::Float(value))
    }

    /// Adds a string parameter.
    #[must_use]
    #[inline]
    pub fn string(self, name: &str, value: &str) -> Self {
        self.with(name, ParameterValue::String(String::from(value)))
    }

    /// Adds a parameter with the given [`ParameterValue`].
    #[must_use]
    #[inline]
    pub fn with(mut self, name: &str, value: ParameterValue) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a parameter, replacing any previous value.
    #[inline]
    pub fn set(&mut self, name: &str, value: ParameterValue) {
        let _ = self.0.insert(String::from(name), value);
    }

    /// Returns the value of the given parameter.
    #[must_use]
    #[inline]
    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    /// Returns the boolean value of the given parameter.
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParameterValue::as_bool)
    }

    /// Returns the integer value of the given parameter.
    #[must_use]
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParameterValue::as_i64)
    }

    /// Returns the floating-point value of the given parameter.
    #[must_use]
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParameterValue::as_f64)
    }

    /// Returns the string value of the given parameter.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParameterValue::as_str)
    }

    /// Checks whether the given parameter is present.
    #[must_use]
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Checks whether there are no parameters.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of parameters.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns an iterator over the parameters, in insertion order.
    #[inline]
    pub fn iter(&self) -> Iter<'_, String, ParameterValue> {
        self.0.iter()
    }
}

impl IntoIterator for ParametersValues {
    type Item = (String, ParameterValue);
    type IntoIter = IntoIter<String, ParameterValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ParametersValues {
    type Item = (&'a String, &'a ParameterValue);
    type IntoIter = Iter<'a, String, ParameterValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<(String, ParameterValue)> for ParametersValues {
    fn from_iter<I: IntoIterator<Item = (String, ParameterValue)>>(iter: I) -> Self {
        let mut values = Self::new();
        for (name, value) in iter {
            let _ = values.0.insert(name, value);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec;

    use super::{
        ParameterError, ParameterErrorKind, ParameterKind, ParameterSpecs, ParameterValue,
        ParametersValues, PrimitiveKind,
    };

    fn light_parameters() -> ParameterSpecs {
        ParameterSpecs::new()
            .required("lightId", ParameterKind::String)
            .optional("brightness", ParameterKind::Float)
            .optional("flashing", ParameterKind::Array(PrimitiveKind::Integer))
    }

    #[test]
    fn test_coerce_primitives() {
        assert_eq!(
            ParameterKind::Integer.coerce(&"42".into()),
            Some(ParameterValue::Integer(42))
        );
        assert_eq!(
            ParameterKind::Integer.coerce(&ParameterValue::Float(3.0)),
            Some(ParameterValue::Integer(3))
        );
        assert_eq!(ParameterKind::Integer.coerce(&ParameterValue::Float(3.5)), None);
        assert_eq!(
            ParameterKind::Float.coerce(&ParameterValue::Integer(2)),
            Some(ParameterValue::Float(2.0))
        );
        assert_eq!(ParameterKind::Float.coerce(&"NaN".into()), None);
        assert_eq!(
            ParameterKind::Boolean.coerce(&"true".into()),
            Some(ParameterValue::Boolean(true))
        );
        assert_eq!(ParameterKind::Boolean.coerce(&"yes".into()), None);
        assert_eq!(
            ParameterKind::String.coerce(&ParameterValue::Integer(7)),
            Some(ParameterValue::String(String::from("7")))
        );
        assert_eq!(ParameterKind::Boolean.coerce(&ParameterValue::Integer(1)), None);
    }

    #[test]
    fn test_coerce_arrays() {
        let kind = ParameterKind::Array(PrimitiveKind::Integer);

        assert_eq!(
            kind.coerce(&"500,500,1000".into()),
            Some(ParameterValue::Array(vec![
                ParameterValue::Integer(500),
                ParameterValue::Integer(500),
                ParameterValue::Integer(1000),
            ]))
        );
        assert_eq!(
            kind.coerce(&ParameterValue::Array(vec!["1".into(), ParameterValue::Integer(2)])),
            Some(ParameterValue::Array(vec![
                ParameterValue::Integer(1),
                ParameterValue::Integer(2),
            ]))
        );
        assert_eq!(kind.coerce(&"1,x".into()), None);
        assert_eq!(kind.coerce(&ParameterValue::Integer(1)), None);
        assert_eq!(kind.coerce(&"".into()), Some(ParameterValue::Array(vec![])));
    }

    #[test]
    fn test_validate() {
        let specs = light_parameters();

        let values = ParametersValues::new()
            .string("lightId", "1")
            .string("brightness", "0.5")
            .string("unknown", "kept");

        let validated = specs.validate(&values).unwrap();
        assert_eq!(validated.get_str("lightId"), Some("1"));
        assert_eq!(validated.get_f64("brightness"), Some(0.5));
        assert_eq!(validated.get_str("unknown"), Some("kept"));
        assert!(!validated.contains("flashing"));
    }

    #[test]
    fn test_validate_errors() {
        let specs = light_parameters();

        assert_eq!(
            specs.validate(&ParametersValues::new().float("brightness", 0.5)),
            Err(ParameterError {
                name: String::from("lightId"),
                kind: ParameterErrorKind::Missing,
            })
        );

        assert_eq!(
            specs.validate(
                &ParametersValues::new()
                    .string("lightId", "1")
                    .boolean("brightness", true)
            ),
            Err(ParameterError {
                name: String::from("brightness"),
                kind: ParameterErrorKind::Mismatch {
                    expected: ParameterKind::Float,
                    found: "boolean",
                },
            })
        );
    }

    #[test]
    fn test_spec_names() {
        let specs = light_parameters();
        assert_eq!(
            specs.names().collect::<alloc::vec::Vec<_>>(),
            vec!["lightId", "brightness", "flashing"]
        );
        assert_eq!(
            specs.required_names().collect::<alloc::vec::Vec<_>>(),
            vec!["lightId"]
        );
    }

    #[cfg(feature = "deserialize")]
    #[test]
    fn test_parameters_serde() {
        let values: ParametersValues = crate::deserialize(serde_json::json!({
            "lightId": "1",
            "brightness": 0.5,
            "power": true,
            "count": 3,
            "pattern": [1, 2],
        }));

        assert_eq!(values.get_str("lightId"), Some("1"));
        assert_eq!(values.get("brightness"), Some(&ParameterValue::Float(0.5)));
        assert_eq!(values.get_bool("power"), Some(true));
        assert_eq!(values.get_i64("count"), Some(3));
        assert_eq!(
            values.get("pattern"),
            Some(&ParameterValue::Array(vec![
                ParameterValue::Integer(1),
                ParameterValue::Integer(2),
            ]))
        );
    }
}
