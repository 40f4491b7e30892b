// src/load_balancer/algorithm.rs
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    RoundRobin,
    LeastConnections,
}

impl Algorithm {
    /// Strict parse; `None` for anything but the two recognized names.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "round-robin" => Some(Algorithm::RoundRobin),
            "least-connections" => Some(Algorithm::LeastConnections),
            _ => None,
        }
    }

    /// Config-level parse: empty means the default, unknown names fall back
    /// to round-robin with a warning.
    pub fn from_name(name: &str) -> Self {
        if name.is_empty() {
            return Algorithm::RoundRobin;
        }
        match Self::parse(name) {
            Some(algorithm) => algorithm,
            None => {
                tracing::warn!(
                    "unknown load balancing algorithm {:?}, falling back to round-robin",
                    name
                );
                Algorithm::RoundRobin
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round-robin",
            Algorithm::LeastConnections => "least-connections",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
