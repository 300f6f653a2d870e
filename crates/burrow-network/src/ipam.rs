//! Persistent IPv4 address allocation.
//!
//! Every subnet has a [`Bitmap`] with one slot per address: slot `i` stands
//! for `network + i + 1`, so slot 0 is the gateway. All pools live in one
//! JSON document mapping the subnet in CIDR notation to its bitmap string.
//!
//! Each operation takes an exclusive `flock` on a sibling `.lock` file,
//! loads the whole document, applies one mutation, and writes it back
//! through a rename. Concurrent runtime invocations therefore never hand
//! out the same address twice.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use burrow_common::error::{BurrowError, Result};
use ipnetwork::Ipv4Network;
use nix::fcntl::{Flock, FlockArg};

use crate::bitmap::Bitmap;

/// Smallest prefix accepted for a subnet. Bounds the bitmap at 65536 slots.
pub const MIN_PREFIX: u8 = 16;

/// Largest prefix accepted for a subnet. Leaves room for one host address.
pub const MAX_PREFIX: u8 = 30;

/// Address allocator backed by a single JSON document.
#[derive(Debug, Clone)]
pub struct Ipam {
    path: PathBuf,
}

type Pools = BTreeMap<Ipv4Network, Bitmap>;

impl Ipam {
    /// Creates an allocator persisting to `path`. Nothing is read until the
    /// first operation.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the allocation document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registers `subnet` and reserves its gateway, which is returned.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Config`] if the prefix is outside
    /// `16..=30`, or [`BurrowError::InvalidState`] if the subnet overlaps
    /// one already registered.
    pub fn create_subnet(&self, subnet: Ipv4Network) -> Result<Ipv4Addr> {
        let subnet = canonical(subnet);
        if !(MIN_PREFIX..=MAX_PREFIX).contains(&subnet.prefix()) {
            return Err(BurrowError::Config {
                message: format!(
                    "subnet {subnet} must have a prefix between /{MIN_PREFIX} and /{MAX_PREFIX}"
                ),
            });
        }
        self.transact(|pools| {
            if let Some(existing) = pools.keys().find(|p| overlaps(**p, subnet)) {
                return Err(BurrowError::InvalidState {
                    message: format!("pool overlaps: {subnet} conflicts with {existing}"),
                });
            }
            let mut bitmap = Bitmap::new(slots(subnet));
            bitmap.set(0);
            let _ = pools.insert(subnet, bitmap);
            Ok(address_at(subnet, 0))
        })
        .inspect(|gateway| tracing::info!(%subnet, %gateway, "subnet created"))
    }

    /// Leases the lowest free host address of `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown subnet or
    /// [`BurrowError::AddressExhausted`] when every host address is leased.
    pub fn allocate(&self, subnet: Ipv4Network) -> Result<Ipv4Addr> {
        let subnet = canonical(subnet);
        self.transact(|pools| {
            let bitmap = pool_mut(pools, subnet)?;
            // The last two slots map to the broadcast address and past the subnet.
            let limit = bitmap.len().saturating_sub(2);
            let index = bitmap
                .first_clear(limit)
                .ok_or_else(|| BurrowError::AddressExhausted {
                    subnet: subnet.to_string(),
                })?;
            bitmap.set(index);
            Ok(address_at(subnet, index))
        })
        .inspect(|ip| tracing::debug!(%subnet, %ip, "address leased"))
    }

    /// Returns `ip` to the free pool of `subnet`. Releasing an address that
    /// is not leased is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown subnet, or
    /// [`BurrowError::Config`] if `ip` is not a host address of `subnet` or
    /// is its gateway.
    pub fn release(&self, subnet: Ipv4Network, ip: Ipv4Addr) -> Result<()> {
        let subnet = canonical(subnet);
        let index = host_index(subnet, ip)?;
        if index == 0 {
            return Err(BurrowError::Config {
                message: format!("{ip} is the gateway of {subnet} and cannot be released"),
            });
        }
        self.transact(|pools| {
            let bitmap = pool_mut(pools, subnet)?;
            if !bitmap.clear(index) {
                tracing::debug!(%subnet, %ip, "address was not leased");
            }
            Ok(())
        })
    }

    /// Unregisters `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown subnet or
    /// [`BurrowError::InvalidState`] while any non-gateway address is leased.
    pub fn delete_subnet(&self, subnet: Ipv4Network) -> Result<()> {
        let subnet = canonical(subnet);
        self.transact(|pools| {
            let bitmap = pool_mut(pools, subnet)?;
            if bitmap.any_set_from(1) {
                return Err(BurrowError::InvalidState {
                    message: format!("subnet {subnet} still has leased addresses"),
                });
            }
            let _ = pools.remove(&subnet);
            Ok(())
        })
        .inspect(|_| tracing::info!(%subnet, "subnet deleted"))
    }

    /// Number of leased addresses in `subnet`, gateway excluded.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown subnet.
    pub fn leased(&self, subnet: Ipv4Network) -> Result<usize> {
        let subnet = canonical(subnet);
        self.read(|pools| {
            pools
                .get(&subnet)
                .map(|b| b.count_ones().saturating_sub(usize::from(b.get(0))))
                .ok_or_else(|| not_found(subnet))
        })
    }

    /// Returns `true` if `subnet` is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read.
    pub fn contains(&self, subnet: Ipv4Network) -> Result<bool> {
        let subnet = canonical(subnet);
        self.read(|pools| Ok(pools.contains_key(&subnet)))
    }

    fn read<T>(&self, f: impl FnOnce(&Pools) -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        f(&self.load()?)
    }

    fn transact<T>(&self, f: impl FnOnce(&mut Pools) -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        let mut pools = self.load()?;
        let value = f(&mut pools)?;
        self.dump(&pools)?;
        Ok(value)
    }

    fn lock(&self) -> Result<Flock<File>> {
        let lock_path = sibling(&self.path, "lock");
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BurrowError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| BurrowError::io(&lock_path, e))?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, e)| BurrowError::syscall(format!("flock {}", lock_path.display()), e))
    }

    fn load(&self) -> Result<Pools> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Pools::new()),
            Err(e) => return Err(BurrowError::io(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Pools::new());
        }
        let raw: BTreeMap<String, String> = serde_json::from_str(&content)?;
        raw.into_iter()
            .map(|(key, bits)| {
                let subnet: Ipv4Network = key.parse().map_err(|e| self.corrupt(format!("{key}: {e}")))?;
                let bitmap = Bitmap::parse(&bits, slots(subnet))
                    .map_err(|e| self.corrupt(format!("{key}: {e}")))?;
                Ok((canonical(subnet), bitmap))
            })
            .collect()
    }

    fn dump(&self, pools: &Pools) -> Result<()> {
        let raw: BTreeMap<String, String> = pools
            .iter()
            .map(|(subnet, bitmap)| (subnet.to_string(), bitmap.to_string()))
            .collect();
        let json = serde_json::to_string(&raw)?;
        let tmp = sibling(&self.path, "tmp");
        std::fs::write(&tmp, json).map_err(|e| BurrowError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| BurrowError::io(&self.path, e))
    }

    fn corrupt(&self, message: String) -> BurrowError {
        BurrowError::Corrupt {
            path: self.path.clone(),
            message,
        }
    }
}

fn canonical(subnet: Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(subnet.network(), subnet.prefix()).unwrap_or(subnet)
}

fn overlaps(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// Slots tracked for `subnet`: 2^(32 - prefix).
fn slots(subnet: Ipv4Network) -> usize {
    1_usize << (32 - u32::from(subnet.prefix()))
}

fn address_at(subnet: Ipv4Network, index: usize) -> Ipv4Addr {
    let offset = u32::try_from(index).unwrap_or(u32::MAX);
    Ipv4Addr::from(u32::from(subnet.network()).saturating_add(offset).saturating_add(1))
}

/// Slot index of `ip`, which must be neither the network nor the broadcast
/// address of `subnet`.
fn host_index(subnet: Ipv4Network, ip: Ipv4Addr) -> Result<usize> {
    let offset = u32::from(ip).wrapping_sub(u32::from(subnet.network())) as usize;
    if !subnet.contains(ip) || offset == 0 || offset >= slots(subnet) - 1 {
        return Err(BurrowError::Config {
            message: format!("{ip} is not a host address of {subnet}"),
        });
    }
    Ok(offset - 1)
}

fn pool_mut(pools: &mut Pools, subnet: Ipv4Network) -> Result<&mut Bitmap> {
    pools.get_mut(&subnet).ok_or_else(|| not_found(subnet))
}

fn not_found(subnet: Ipv4Network) -> BurrowError {
    BurrowError::NotFound {
        kind: "subnet",
        id: subnet.to_string(),
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}
