//! Provider selection by name (spec §4.1 is explicit about three backend
//! kinds; this is the supplemental "pick one by name" glue a runnable CLI
//! needs).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::oneshot::{OneshotLaunchConfig, OneshotProvider};
use crate::rpc::{RpcLaunchConfig, RpcProvider, RpcTransport};
use crate::sdk::{SdkLaunchConfig, SdkProvider};
use crate::traits::Provider;

/// The three backend kinds named abstractly in spec §1/§4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Sdk,
    Rpc,
    Oneshot,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Sdk => "sdk",
            ProviderKind::Rpc => "rpc",
            ProviderKind::Oneshot => "oneshot",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sdk" => Ok(ProviderKind::Sdk),
            "rpc" => Ok(ProviderKind::Rpc),
            "oneshot" => Ok(ProviderKind::Oneshot),
            other => Err(Error::InvalidConfig(format!("unknown provider kind: {other}"))),
        }
    }
}

/// Spawns a provider of the given kind, launching `program args` as its
/// subprocess command. For `ProviderKind::Rpc` this allocates a fresh shared
/// `RpcTransport` (callers wanting multiple threads over one transport
/// should construct `RpcProvider::new` directly against a shared transport
/// instead of going through this convenience entry point).
pub async fn spawn_provider(
    kind: ProviderKind,
    name: &str,
    program: &str,
    args: Vec<String>,
) -> Result<Arc<dyn Provider>> {
    match kind {
        ProviderKind::Sdk => Ok(Arc::new(SdkProvider::new(
            name,
            SdkLaunchConfig {
                program: program.to_string(),
                args,
            },
        ))),
        ProviderKind::Oneshot => Ok(Arc::new(OneshotProvider::new(
            name,
            OneshotLaunchConfig {
                program: program.to_string(),
                args,
            },
        ))),
        ProviderKind::Rpc => {
            let transport = RpcTransport::spawn(RpcLaunchConfig {
                program: program.to_string(),
                args,
                work_dir: None,
            })
            .await?;
            Ok(Arc::new(RpcProvider::new(name, transport)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_recognizes_all_three_kinds() {
        assert_eq!(ProviderKind::from_name("sdk").unwrap(), ProviderKind::Sdk);
        assert_eq!(ProviderKind::from_name("rpc").unwrap(), ProviderKind::Rpc);
        assert_eq!(ProviderKind::from_name("oneshot").unwrap(), ProviderKind::Oneshot);
        assert!(ProviderKind::from_name("nope").is_err());
    }
}
