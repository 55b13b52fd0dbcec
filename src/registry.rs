//! Versions and public key tokens of every assembly seen so far.
//!
//! Each loaded module contributes its own assembly and every assembly it references. Injected
//! references must point at a version the process actually uses, so the registry keeps all
//! distinct `(name, version, token)` triples and answers "newest version of `name`" queries.
//!
//! Entries live in a lock-free ordered set, so module load callbacks on different threads can
//! record concurrently while the JIT path reads.

use std::fmt;

use crossbeam_skiplist::SkipSet;
use sha1::{Digest, Sha1};

use crate::{
    host::{AssemblyVersions, Host, ModuleId},
    Result,
};

/// Size of a public key token
pub const PUBLIC_KEY_TOKEN_SIZE: usize = 8;

/// Four-part assembly version, ordered component by component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssemblyVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl AssemblyVersion {
    /// Create a version
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        AssemblyVersion {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// A resolved assembly identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblyReference {
    /// Simple name
    pub name: String,
    /// Version
    pub version: AssemblyVersion,
    /// Public key token, all zero for assemblies without a strong name
    pub public_key_token: [u8; PUBLIC_KEY_TOKEN_SIZE],
}

/// Assembly identity as read from metadata, before the token is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRecord {
    /// Simple name
    pub name: String,
    /// Version
    pub version: AssemblyVersion,
    /// Either a full public key or an 8-byte token
    pub public_key_or_token: Vec<u8>,
}

/// A module's own assembly and the assemblies it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleAssemblies {
    /// The defining assembly
    pub assembly: AssemblyRecord,
    /// `AssemblyRef` rows
    pub references: Vec<AssemblyRecord>,
}

/// Derive the public key token for a key blob.
///
/// Blobs of exactly 8 bytes are tokens already. Otherwise the token is the last 8 bytes of the
/// SHA-1 hash of the key, in reverse order. An empty blob yields the all-zero token.
#[must_use]
pub fn public_key_token(public_key_or_token: &[u8]) -> [u8; PUBLIC_KEY_TOKEN_SIZE] {
    let mut token = [0u8; PUBLIC_KEY_TOKEN_SIZE];
    match public_key_or_token.len() {
        0 => {}
        PUBLIC_KEY_TOKEN_SIZE => token.copy_from_slice(public_key_or_token),
        _ => {
            let mut hasher = Sha1::new();
            hasher.update(public_key_or_token);
            let hash = hasher.finalize();

            let tail = &hash[hash.len() - PUBLIC_KEY_TOKEN_SIZE..];
            for (dst, src) in token.iter_mut().zip(tail.iter().rev()) {
                *dst = *src;
            }
        }
    }
    token
}

/// Every distinct assembly identity seen in the process.
#[derive(Default)]
pub struct AssemblyRegistry {
    assemblies: SkipSet<AssemblyReference>,
}

impl AssemblyRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        AssemblyRegistry {
            assemblies: SkipSet::new(),
        }
    }

    /// Number of distinct identities
    #[must_use]
    pub fn len(&self) -> usize {
        self.assemblies.len()
    }

    /// True if nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assemblies.is_empty()
    }

    /// Record one identity; returns true if it was not known yet
    pub fn record_assembly(&self, record: &AssemblyRecord) -> bool {
        let reference = AssemblyReference {
            name: record.name.clone(),
            version: record.version,
            public_key_token: public_key_token(&record.public_key_or_token),
        };

        if self.assemblies.contains(&reference) {
            return false;
        }
        self.assemblies.insert(reference);
        true
    }

    /// Record a module's assembly and all of its references.
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] if the host cannot read the module's assembly metadata.
    pub fn record_module(&self, host: &dyn Host, module: ModuleId) -> Result<()> {
        let assemblies = host.module_assemblies(module)?;

        self.record_assembly(&assemblies.assembly);
        for reference in &assemblies.references {
            self.record_assembly(reference);
        }
        Ok(())
    }

    /// All identities recorded under `name`, oldest version first
    #[must_use]
    pub fn assemblies_by_name(&self, name: &str) -> Vec<AssemblyReference> {
        let lower = AssemblyReference {
            name: name.to_string(),
            version: AssemblyVersion::new(0, 0, 0, 0),
            public_key_token: [0; PUBLIC_KEY_TOKEN_SIZE],
        };
        let upper = AssemblyReference {
            name: name.to_string(),
            version: AssemblyVersion::new(u16::MAX, u16::MAX, u16::MAX, u16::MAX),
            public_key_token: [u8::MAX; PUBLIC_KEY_TOKEN_SIZE],
        };

        self.assemblies
            .range(lower..=upper)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// The identity with the highest version recorded under `name`.
    ///
    /// When several tokens share the highest version, the first recorded in set order wins.
    #[must_use]
    pub fn find_max_reference(&self, name: &str) -> Option<AssemblyReference> {
        self.assemblies_by_name(name)
            .into_iter()
            .reduce(|best, candidate| {
                if candidate.version > best.version {
                    candidate
                } else {
                    best
                }
            })
    }
}

impl AssemblyVersions for AssemblyRegistry {
    fn find_max_version(&self, name: &str) -> Option<AssemblyVersion> {
        self.find_max_reference(name).map(|reference| reference.version)
    }
}
