//! Error taxonomy for the replication acceptance check.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure to read the bootstrap range's replica count out of a meta2 scan.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to decode range descriptor at key {}", display_key(.key))]
    Decode {
        key: Vec<u8>,
        #[source]
        source: serde_json::Error,
    },
    #[error("first range not found among {scanned} meta2 rows")]
    BootstrapRangeNotFound { scanned: usize },
}

/// Terminal outcome of a failed replication check.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Could not open a client against the chosen node.
    #[error("failed to connect to {endpoint}")]
    Setup {
        endpoint: String,
        #[source]
        source: BoxError,
    },
    /// The meta2 scan itself failed.
    #[error("meta2 scan failed")]
    Transport(#[source] BoxError),
    #[error("failed to decode range descriptor at key {}", display_key(.key))]
    Decode {
        key: Vec<u8>,
        #[source]
        source: serde_json::Error,
    },
    #[error("first range not found among {scanned} meta2 rows")]
    BootstrapRangeNotFound { scanned: usize },
    #[error(
        "failed to replicate first range: wanted {target} replicas, last saw {} after {attempts} attempts",
        display_observed(.last_observed)
    )]
    ConvergenceTimeout {
        attempts: usize,
        target: usize,
        last_observed: Option<usize>,
    },
    #[error(
        "interrupted after {attempts} attempts (last saw {} replicas)",
        display_observed(.last_observed)
    )]
    Interrupted {
        attempts: usize,
        last_observed: Option<usize>,
    },
    /// Cluster harness lifecycle failure (start/stop).
    #[error("cluster harness failed: {context}")]
    Harness {
        context: &'static str,
        #[source]
        source: BoxError,
    },
}

impl CheckError {
    /// Structural failures that no amount of additional waiting would fix.
    pub fn is_fatal_precondition(&self) -> bool {
        matches!(
            self,
            CheckError::Setup { .. }
                | CheckError::Transport(_)
                | CheckError::Decode { .. }
                | CheckError::BootstrapRangeNotFound { .. }
                | CheckError::Harness { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CheckError::ConvergenceTimeout { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, CheckError::Interrupted { .. })
    }

    pub(crate) fn transport(err: anyhow::Error) -> Self {
        CheckError::Transport(err.into())
    }

    pub(crate) fn setup(endpoint: impl Into<String>, err: anyhow::Error) -> Self {
        CheckError::Setup {
            endpoint: endpoint.into(),
            source: err.into(),
        }
    }

    pub(crate) fn harness(context: &'static str, err: anyhow::Error) -> Self {
        CheckError::Harness {
            context,
            source: err.into(),
        }
    }
}

impl From<ExtractError> for CheckError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Decode { key, source } => CheckError::Decode { key, source },
            ExtractError::BootstrapRangeNotFound { scanned } => {
                CheckError::BootstrapRangeNotFound { scanned }
            }
        }
    }
}

/// Render a key as text when printable, hex otherwise.
fn display_key(key: &[u8]) -> String {
    if key.iter().all(|b| b.is_ascii_graphic()) {
        return String::from_utf8_lossy(key).into_owned();
    }
    let mut out = String::with_capacity(2 + key.len() * 2);
    out.push_str("0x");
    for b in key {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn display_observed(observed: &Option<usize>) -> String {
    match observed {
        Some(count) => count.to_string(),
        None => "no".to_string(),
    }
}
