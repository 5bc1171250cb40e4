// Named cloud endpoints.
//
// Every path the engine touches is resolved against one of two bases so the
// whole surface can be pointed at a mock server or a regional host.

use url::Url;

use crate::error::Error;

pub const DEFAULT_AUTH_BASE: &str = "https://ocapi-app.arlo.com/api/";
pub const DEFAULT_API_BASE: &str = "https://myapi.arlo.com/hmsweb/";

/// Base URLs for the authentication API and the device/session API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub auth_base: Url,
    pub api_base: Url,
}

impl Endpoints {
    /// Build from explicit bases, normalizing to a trailing slash so
    /// relative joins keep the last path segment.
    pub fn new(auth_base: &str, api_base: &str) -> Result<Self, Error> {
        Ok(Self {
            auth_base: Url::parse(&with_trailing_slash(auth_base))?,
            api_base: Url::parse(&with_trailing_slash(api_base))?,
        })
    }

    /// Resolve a path under the authentication API.
    pub fn auth(&self, path: &str) -> Result<Url, Error> {
        Ok(self.auth_base.join(path)?)
    }

    /// Resolve a path under the device/session API.
    pub fn api(&self, path: &str) -> Result<Url, Error> {
        Ok(self.api_base.join(path)?)
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth_base: Url::parse(DEFAULT_AUTH_BASE).expect("default auth base is a valid URL"),
            api_base: Url::parse(DEFAULT_API_BASE).expect("default API base is a valid URL"),
        }
    }
}

fn with_trailing_slash(base: &str) -> String {
    if base.ends_with('/') {
        base.to_owned()
    } else {
        format!("{base}/")
    }
}

// ── Device/session API paths ────────────────────────────────────────

pub(crate) const SESSION: &str = "users/session/v2";
pub(crate) const LOGOUT: &str = "logout";
pub(crate) const SUBSCRIBE: &str = "client/subscribe";
pub(crate) const DEVICES: &str = "v2/users/devices";
pub(crate) const AUTOMATION_ACTIVE: &str = "users/devices/automation/active";
pub(crate) const NOTIFY: &str = "users/devices/notify";
pub(crate) const START_STREAM: &str = "users/devices/startStream";
pub(crate) const STOP_STREAM: &str = "users/devices/stopStream";
pub(crate) const SNAPSHOT: &str = "users/devices/fullFrameSnapshot";
pub(crate) const CERT_CREATE: &str = "users/devices/v2/security/cert/create";
pub(crate) const RATLS_TOKEN: &str = "users/device/ratls/token";
pub(crate) const VERSION: &str = "version";
