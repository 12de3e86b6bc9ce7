//! Room archive for the in-memory authority.

use std::io::ErrorKind;
use std::path::Path;

use rkyv::api::high::{HighDeserializer, HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor::Error;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

pub const STORE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("room store codec: {0}")]
    Codec(#[from] Error),
    #[error("room store version {found}, expected {STORE_VERSION}")]
    Version { found: u32 },
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct StoredRoom {
    pub id: String,
    pub cols: u8,
    pub rows: u8,
    /// Running seed, when the room was created in running-seed mode.
    pub seed: Option<u32>,
    pub edge_seeds: Vec<u16>,
    pub image: String,
    /// Flattened `x, y` pairs.
    pub positions: Vec<f32>,
    pub connectivity: Vec<u16>,
    pub created_unix_secs: u64,
    pub revision: u32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct StoredRooms {
    pub version: u32,
    pub rooms: Vec<StoredRoom>,
}

impl StoredRooms {
    pub fn new(rooms: Vec<StoredRoom>) -> Self {
        Self {
            version: STORE_VERSION,
            rooms,
        }
    }
}

pub fn encode<T>(value: &T) -> Result<Vec<u8>, StoreError>
where
    T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, Error>>,
{
    Ok(rkyv::to_bytes::<Error>(value)?.into_vec())
}

pub fn decode<T>(bytes: &[u8]) -> Result<T, StoreError>
where
    T: Archive,
    T::Archived:
        for<'a> CheckBytes<HighValidator<'a, Error>> + Deserialize<T, HighDeserializer<Error>>,
{
    // Archives need aligned storage; file contents come back unaligned.
    let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    Ok(rkyv::from_bytes::<T, Error>(&aligned)?)
}

/// Writes the archive next to `path` first so a crash never leaves a torn
/// file behind.
pub fn save(path: &Path, rooms: &StoredRooms) -> Result<(), StoreError> {
    let bytes = encode(rooms)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// `None` when no archive exists yet.
pub fn load(path: &Path) -> Result<Option<StoredRooms>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let rooms: StoredRooms = decode(&bytes)?;
    if rooms.version != STORE_VERSION {
        return Err(StoreError::Version {
            found: rooms.version,
        });
    }
    Ok(Some(rooms))
}
