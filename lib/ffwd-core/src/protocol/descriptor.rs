use std::fmt;

use serde::Deserialize;
use url::Url;

/// TLS options for a protocol destination.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TlsOptions {
    /// Whether TLS is enabled.
    pub enabled: bool,

    /// Server name to verify against, if different from the host.
    pub server_name: Option<String>,
}

/// Description of a protocol destination.
///
/// In textual form, descriptors are URLs where the scheme selects the connector and the authority is the remote
/// address. TLS can be requested through the `tls` query parameter, and the name to verify with `tls_server_name`.
///
/// ## Examples
///
/// - `tcp://127.0.0.1:19091`
/// - `udp://riemann.example.net:5555`
/// - `tcp://collector.example.net:19000?tls=true&tls_server_name=collector`
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(try_from = "String")]
pub struct ProtocolDescriptor {
    scheme: String,
    host: String,
    port: u16,
    tls: TlsOptions,
}

impl ProtocolDescriptor {
    /// Creates a new `ProtocolDescriptor` without TLS.
    pub fn new<S: Into<String>, H: Into<String>>(scheme: S, host: H, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            tls: TlsOptions::default(),
        }
    }

    /// Returns the scheme, which selects the connector.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the remote host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the remote port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the TLS options.
    pub fn tls(&self) -> &TlsOptions {
        &self.tls
    }

    /// Returns the remote address in `host:port` form, suitable for address resolution.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ProtocolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

impl TryFrom<String> for ProtocolDescriptor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl<'a> TryFrom<&'a str> for ProtocolDescriptor {
    type Error = String;

    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        let url = Url::parse(value).map_err(|e| e.to_string())?;

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.trim_start_matches('[').trim_end_matches(']').to_string(),
            _ => return Err(format!("destination '{}' is missing a host", value)),
        };
        let port = url
            .port()
            .ok_or_else(|| format!("destination '{}' is missing a port", value))?;

        let mut tls = TlsOptions::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "tls" => {
                    tls.enabled = value
                        .parse()
                        .map_err(|_| format!("invalid value '{}' for 'tls', expected 'true' or 'false'", value))?
                }
                "tls_server_name" => tls.server_name = Some(value.into_owned()),
                other => return Err(format!("unknown destination option '{}'", other)),
            }
        }

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port,
            tls,
        })
    }
}
