//! Address registry for peer discovery
//!
//! Each serving node publishes its listen address to a plain-text file in
//! a shared well-known directory, one file per logical end. Presence of
//! the file means "this end *was* serving as of last update"; absence
//! means "never served or was cleanly stopped". This is best-effort
//! discovery, not a liveness guarantee: a stale file left by a crashed
//! process is tolerated because the subsequent connect attempt just fails.

use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::role::Role;

/// The address a node's server listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.ip, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::AddressMalformed {
            end: String::new(),
            text: s.to_string(),
        };

        let rest = s.trim().strip_prefix("tcp://").ok_or_else(malformed)?;
        let sock: SocketAddr = rest.parse().map_err(|_| malformed())?;
        Ok(NodeAddress::new(sock.ip(), sock.port()))
    }
}

/// Persists and retrieves per-end server addresses
#[derive(Debug, Clone)]
pub struct AddressRegistry {
    dir: PathBuf,
}

impl AddressRegistry {
    /// Create a registry over the given directory (None = OS temp dir)
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir: dir.unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Path of the address file for a logical end
    pub fn address_file(&self, end: Role) -> PathBuf {
        self.dir.join(format!("neurobridge-{end}.address"))
    }

    /// Persist or clear the address for an end.
    ///
    /// Writes go through a temp file plus rename, so concurrent readers
    /// never observe a partially written address.
    pub fn save(&self, end: Role, address: Option<&NodeAddress>) -> Result<()> {
        let path = self.address_file(end);

        match address {
            Some(address) => {
                let tmp = path.with_extension("address.tmp");
                fs::write(&tmp, address.to_string())?;
                fs::rename(&tmp, &path)?;
                debug!(end = %end, address = %address, "Saved address file");
            }
            None => match fs::remove_file(&path) {
                Ok(()) => debug!(end = %end, "Removed address file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }

        Ok(())
    }

    /// Read the last-saved address for an end
    pub fn read(&self, end: Role) -> Result<NodeAddress> {
        let path = self.address_file(end);

        let text = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::AddressNotFound {
                    end: end.to_string(),
                    path: path.clone(),
                }
            } else {
                e.into()
            }
        })?;

        text.parse::<NodeAddress>()
            .map_err(|_| Error::AddressMalformed {
                end: end.to_string(),
                text: text.trim().to_string(),
            })
    }

    /// The directory this registry operates over
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_registry() -> (TempDir, AddressRegistry) {
        let dir = TempDir::new().unwrap();
        let registry = AddressRegistry::new(Some(dir.path().to_path_buf()));
        (dir, registry)
    }

    #[test]
    fn test_address_display_and_parse() {
        let addr: NodeAddress = "tcp://127.0.0.1:7919".parse().unwrap();
        assert_eq!(addr.port, 7919);
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:7919");
    }

    #[test]
    fn test_malformed_address_rejected() {
        assert!("http://127.0.0.1:80".parse::<NodeAddress>().is_err());
        assert!("tcp://not-a-host".parse::<NodeAddress>().is_err());
        assert!("".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn test_save_then_read() {
        let (_dir, registry) = test_registry();
        let addr: NodeAddress = "tcp://127.0.0.1:7001".parse().unwrap();

        registry.save(Role::Neuron, Some(&addr)).unwrap();
        assert_eq!(registry.read(Role::Neuron).unwrap(), addr);
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (_dir, registry) = test_registry();
        assert!(matches!(
            registry.read(Role::Blender),
            Err(Error::AddressNotFound { .. })
        ));
    }

    #[test]
    fn test_clear_removes_file() {
        let (_dir, registry) = test_registry();
        let addr: NodeAddress = "tcp://127.0.0.1:7001".parse().unwrap();

        registry.save(Role::Neuron, Some(&addr)).unwrap();
        assert!(registry.address_file(Role::Neuron).exists());

        registry.save(Role::Neuron, None).unwrap();
        assert!(!registry.address_file(Role::Neuron).exists());

        // Clearing twice is fine
        registry.save(Role::Neuron, None).unwrap();
    }

    #[test]
    fn test_malformed_file_content() {
        let (_dir, registry) = test_registry();
        fs::write(registry.address_file(Role::Neuron), "garbage").unwrap();

        assert!(matches!(
            registry.read(Role::Neuron),
            Err(Error::AddressMalformed { .. })
        ));
    }

    #[test]
    fn test_ends_do_not_conflict() {
        let (_dir, registry) = test_registry();
        let a: NodeAddress = "tcp://127.0.0.1:7001".parse().unwrap();
        let b: NodeAddress = "tcp://127.0.0.1:7002".parse().unwrap();

        registry.save(Role::Neuron, Some(&a)).unwrap();
        registry.save(Role::Blender, Some(&b)).unwrap();

        assert_eq!(registry.read(Role::Neuron).unwrap(), a);
        assert_eq!(registry.read(Role::Blender).unwrap(), b);
    }
}
