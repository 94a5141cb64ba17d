use alloc::string::String;

use serde::Serialize;

use crate::api::{ApiKey, ApiPath, Method};
use crate::normalize;
use crate::parameters::ParametersValues;

/// A request sent by a client application to the manager.
///
/// A [`Request`] is assembled through its builder methods and is immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct Request {
    origin: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    service_id: Option<String>,
    profile: String,
    #[serde(flatten)]
    path: ApiPath,
    method: Method,
    #[serde(skip_serializing_if = "ParametersValues::is_empty", default)]
    parameters: ParametersValues,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    access_token: Option<String>,
}

impl Request {
    /// Creates a [`Request`] for the given origin, profile, path and method.
    #[must_use]
    pub fn new(origin: &str, profile: &str, path: ApiPath, method: Method) -> Self {
        Self {
            origin: String::from(origin.trim()),
            service_id: None,
            profile: normalize(profile),
            path,
            method,
            parameters: ParametersValues::new(),
            access_token: None,
        }
    }

    /// Creates a `GET` [`Request`].
    #[must_use]
    #[inline]
    pub fn get(origin: &str, profile: &str, path: ApiPath) -> Self {
        Self::new(origin, profile, path, Method::Get)
    }

    /// Creates a `POST` [`Request`].
    #[must_use]
    #[inline]
    pub fn post(origin: &str, profile: &str, path: ApiPath) -> Self {
        Self::new(origin, profile, path, Method::Post)
    }

    /// Creates a `PUT` [`Request`].
    #[must_use]
    #[inline]
    pub fn put(origin: &str, profile: &str, path: ApiPath) -> Self {
        Self::new(origin, profile, path, Method::Put)
    }

    /// Creates a `DELETE` [`Request`].
    #[must_use]
    #[inline]
    pub fn delete(origin: &str, profile: &str, path: ApiPath) -> Self {
        Self::new(origin, profile, path, Method::Delete)
    }

    /// Targets a service.
    #[must_use]
    #[inline]
    pub fn service(mut self, service_id: &str) -> Self {
        self.service_id = Some(String::from(service_id));
        self
    }

    /// Sets the request parameters.
    #[must_use]
    #[inline]
    pub fn parameters(mut self, parameters: ParametersValues) -> Self {
        self.parameters = parameters;
        self
    }

    /// Attaches an access token.
    #[must_use]
    #[inline]
    pub fn access_token(mut self, access_token: &str) -> Self {
        self.access_token = Some(String::from(access_token));
        self
    }

    /// Returns the origin of the caller.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the targeted service identifier.
    #[must_use]
    pub fn service_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }

    /// Returns the profile name.
    #[must_use]
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Returns the [`ApiPath`].
    #[must_use]
    pub const fn path(&self) -> &ApiPath {
        &self.path
    }

    /// Returns the [`Method`].
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Returns the request parameters.
    #[must_use]
    pub const fn params(&self) -> &ParametersValues {
        &self.parameters
    }

    /// Returns the access token.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Returns the [`ApiKey`] addressed by the request.
    #[must_use]
    #[inline]
    pub fn key(&self) -> ApiKey {
        ApiKey::new(self.method, self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::api::{ApiKey, ApiPath, Method};
    use crate::parameters::ParametersValues;

    use super::Request;

    #[test]
    fn test_request() {
        let request = Request::post("com.example.app", "Light", ApiPath::root())
            .service("hue.1")
            .parameters(ParametersValues::new().string("lightId", "1"))
            .access_token("token");

        assert_eq!(request.origin(), "com.example.app");
        assert_eq!(request.profile(), "light");
        assert_eq!(request.service_id(), Some("hue.1"));
        assert_eq!(request.token(), Some("token"));
        assert_eq!(request.params().get_str("lightId"), Some("1"));
        assert_eq!(request.key(), ApiKey::new(Method::Post, ApiPath::root()));
    }

    #[cfg(feature = "deserialize")]
    #[test]
    fn test_request_serde() {
        use crate::{deserialize, serialize};

        let request = Request::put("app", "light", ApiPath::attribute("onChange")).service("hue.1");

        assert_eq!(
            serialize(&request),
            serde_json::json!({
                "origin": "app",
                "serviceId": "hue.1",
                "profile": "light",
                "attribute": "onchange",
                "method": "PUT",
            })
        );
        assert_eq!(deserialize::<Request>(serialize(&request)), request);
    }
}
