use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use crate::core::error::{Error, ErrorKind, Result};

/// Transport security requested by a descriptor's `ssl` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsOptions {
    pub ca_bundle: Option<PathBuf>,
}

/// One cluster inside a connection string.
///
/// Grammar: `[credentials@]address[/database][?key=value&...][[replicas]]`.
/// `ssl=true` turns TLS on and `ssl_ca_certs=<path>` names the CA bundle;
/// other parameters are handed to the driver untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescriptor {
    pub address: String,
    pub replicas: usize,
    pub credentials: Option<String>,
    pub database: Option<String>,
    pub tls: Option<TlsOptions>,
    pub params: Vec<(String, String)>,
}

impl ClusterDescriptor {
    /// Single plain connection to `address`.
    pub fn new(address: impl Into<String>) -> Self {
        ClusterDescriptor {
            address: address.into(),
            replicas: 1,
            credentials: None,
            database: None,
            tls: None,
            params: Vec::new(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (body, replicas) = split_replicas(raw);
        let (prefix, query) = match body.find('?') {
            Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
            None => (body, None),
        };

        let (scheme, rest) = match prefix.find("://") {
            Some(pos) => (Some(&prefix[..pos]), &prefix[pos + 3..]),
            None => (None, prefix),
        };
        let (credentials, rest) = match rest.rfind('@') {
            Some(pos) => (Some(rest[..pos].to_string()), &rest[pos + 1..]),
            None => (None, rest),
        };
        let (host, database) = match rest.find('/') {
            Some(pos) => {
                let db = &rest[pos + 1..];
                (&rest[..pos], (!db.is_empty()).then(|| db.to_string()))
            }
            None => (rest, None),
        };

        if host.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("cluster descriptor `{}` has no address", raw),
            ));
        }

        let address = match scheme {
            Some(scheme) => format!("{}://{}", scheme, host),
            None => host.to_string(),
        };

        let mut descriptor = ClusterDescriptor {
            address,
            replicas,
            credentials: credentials.filter(|c| !c.is_empty()),
            database,
            tls: None,
            params: Vec::new(),
        };
        if let Some(query) = query {
            descriptor.apply_params(query);
        }
        Ok(descriptor)
    }

    fn apply_params(&mut self, query: &str) {
        let mut ssl = false;
        let mut ca_bundle = None;

        for part in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match part.find('=') {
                Some(pos) => (&part[..pos], &part[pos + 1..]),
                None => (part, ""),
            };
            match key {
                "ssl" => match value {
                    "true" => ssl = true,
                    "false" => ssl = false,
                    other => log::warn!("ignoring ssl={} on {}, TLS stays off", other, self.address),
                },
                "ssl_ca_certs" if !value.is_empty() => ca_bundle = Some(PathBuf::from(value)),
                _ => self.params.push((key.to_string(), value.to_string())),
            }
        }

        if ssl {
            self.tls = Some(TlsOptions { ca_bundle });
        }
    }

    /// Address plus the pass-through parameters, as a driver would take it.
    pub fn uri(&self) -> String {
        if self.params.is_empty() {
            return self.address.clone();
        }
        let params: Vec<String> = self.params
            .iter()
            .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{}={}", k, v) })
            .collect();
        format!("{}?{}", self.address, params.join("&"))
    }
}

// Never print credentials.
impl fmt::Display for ClusterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if let Some(db) = &self.database {
            write!(f, "/{}", db)?;
        }
        write!(f, "[{}]", self.replicas)?;
        if self.tls.is_some() {
            write!(f, " (tls)")?;
        }
        Ok(())
    }
}

impl FromStr for ClusterDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ClusterDescriptor::parse(s)
    }
}

/// `host[N]` suffix. Anything unparsable means one replica.
fn split_replicas(raw: &str) -> (&str, usize) {
    let open = match raw.rfind('[') {
        Some(pos) if pos > 0 => pos,
        _ => return (raw, 1),
    };
    let body = &raw[..open];
    let annotation = &raw[open + 1..];

    let replicas = match annotation.find(']') {
        Some(end) => match annotation[..end].trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                log::warn!("malformed replica count in `{}`, using 1", raw);
                1
            }
        },
        None => {
            log::warn!("unterminated replica count in `{}`, using 1", raw);
            1
        }
    };
    (body, replicas)
}

/// Comma-separated list of cluster descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub clusters: Vec<ClusterDescriptor>,
}

impl ConnectionSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let clusters = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(ClusterDescriptor::parse)
            .collect::<Result<Vec<_>>>()?;

        if clusters.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "connection string names no cluster".to_string(),
            ));
        }
        Ok(ConnectionSpec { clusters })
    }

    pub fn total_connections(&self) -> usize {
        self.clusters.iter().map(|c| c.replicas).sum()
    }
}

impl FromStr for ConnectionSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ConnectionSpec::parse(s)
    }
}
