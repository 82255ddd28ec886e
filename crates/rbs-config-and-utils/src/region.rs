//! Backend regions and the endpoint set each one resolves to.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Deployment region of the RBS backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// Production, eu-west-1.
    #[default]
    EuWest1,
    /// Beta environment, eu-west-1.
    EuWest1Beta,
}

impl Region {
    /// Base URL for token endpoints and GET actions.
    pub fn get_url(&self) -> &'static str {
        match self {
            Region::EuWest1 => "https://core.rtbs.io/",
            Region::EuWest1Beta => "https://core-test.rettermobile.com/",
        }
    }

    /// Base URL for POST actions.
    pub fn post_url(&self) -> &'static str {
        match self {
            Region::EuWest1 => "https://core-internal.rtbs.io/",
            Region::EuWest1Beta => "https://core-internal-beta.rtbs.io/",
        }
    }

    /// Realtime socket endpoint.
    pub fn socket_url(&self) -> &'static str {
        match self {
            Region::EuWest1 => "wss://socket.rtbs.io/",
            Region::EuWest1Beta => "wss://socket-test.rettermobile.com/",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::EuWest1 => "eu_west_1",
            Region::EuWest1Beta => "eu_west_1_beta",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "eu_west_1" => Ok(Region::EuWest1),
            "eu_west_1_beta" => Ok(Region::EuWest1Beta),
            other => Err(CoreError::Config(format!("Unknown region: {}", other))),
        }
    }
}

/// Fully resolved endpoint set used by the HTTP and socket transports.
///
/// All base URLs end with a trailing slash so relative paths such as
/// `public/auth` join underneath them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub get_url: Url,
    pub post_url: Url,
    pub socket_url: Url,
}

impl Endpoints {
    /// Endpoints of a region without overrides.
    pub fn for_region(region: Region) -> CoreResult<Self> {
        Self::resolve(region, None, None, None)
    }

    /// Resolve endpoints for a region, applying any overrides.
    pub fn resolve(
        region: Region,
        get_url: Option<&str>,
        post_url: Option<&str>,
        socket_url: Option<&str>,
    ) -> CoreResult<Self> {
        Ok(Self {
            get_url: parse_base(get_url.unwrap_or(region.get_url()))?,
            post_url: parse_base(post_url.unwrap_or(region.post_url()))?,
            socket_url: Url::parse(socket_url.unwrap_or(region.socket_url()))?,
        })
    }
}

fn parse_base(raw: &str) -> CoreResult<Url> {
    if raw.ends_with('/') {
        Ok(Url::parse(raw)?)
    } else {
        Ok(Url::parse(&format!("{}/", raw))?)
    }
}
