use std::fmt;

/// An Endpoint names one reachable peer address: host, port, and for
/// multipath sessions the subflow the address belongs to.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub subflow_id: Option<u16>,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Endpoint {
            address: address.into(),
            port,
            subflow_id: None,
        }
    }

    pub fn with_subflow(address: impl Into<String>, port: u16, subflow_id: u16) -> Self {
        Endpoint {
            address: address.into(),
            port,
            subflow_id: Some(subflow_id),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subflow_id {
            Some(id) => write!(f, "{}:{}#{}", self.address, self.port, id),
            None => write!(f, "{}:{}", self.address, self.port),
        }
    }
}
