use alloc::{
    collections::BTreeMap,
    vec,
    vec::Vec,
};

use crc::{
    CRC_32_ISO_HDLC,
    Crc,
};
use embedded_storage::Storage;
use serde::{
    Serialize,
    de::DeserializeOwned,
};

use super::{
    ConfigValue,
    Entry,
};
use crate::{
    Error,
    Result,
};

const MAGIC: [u8; 4] = *b"MTCF";
const HEADER_LEN: usize = 16;
const SLOTS: usize = 2;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadOutcome {
    Loaded { generation: u32 },
    /// Neither slot has ever been written.
    Empty,
    /// A slot carried the magic but failed validation; defaults in use.
    Corrupt,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    generation: u32,
    length: u32,
    crc: u32,
}

impl Header {
    fn parse(raw: &[u8; HEADER_LEN]) -> Option<Self> {
        if raw[..4] != MAGIC {
            return None;
        }
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Some(Self { generation: word(4), length: word(8), crc: word(12) })
    }

    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut raw = [0u8; HEADER_LEN];
        raw[..4].copy_from_slice(&MAGIC);
        raw[4..8].copy_from_slice(&self.generation.to_le_bytes());
        raw[8..12].copy_from_slice(&self.length.to_le_bytes());
        raw[12..16].copy_from_slice(&self.crc.to_le_bytes());
        raw
    }
}

/// Typed key/value map with registered defaults, kept in two flash slots.
///
/// Values are only ever read and written through registered keys; a value
/// whose type differs from the registered default is refused.
pub struct ConfigStore<S> {
    storage: S,
    base: u32,
    slot_size: u32,
    defaults: BTreeMap<&'static str, ConfigValue>,
    values: BTreeMap<&'static str, ConfigValue>,
    generation: u32,
    active_slot: Option<usize>,
}

impl<S: Storage> ConfigStore<S> {
    /// `base` is the first byte of slot A; slot B follows at `base + slot_size`.
    pub fn new(storage: S, base: u32, slot_size: u32) -> Self {
        Self {
            storage,
            base,
            slot_size,
            defaults: BTreeMap::new(),
            values: BTreeMap::new(),
            generation: 0,
            active_slot: None,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Registers `key` with its default. Re-registering replaces the
    /// default and resets the value.
    pub fn register(&mut self, key: &'static str, default: ConfigValue) {
        self.values.insert(key, default.clone());
        self.defaults.insert(key, default);
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.defaults.contains_key(key)
    }

    pub fn reset_to_defaults(&mut self) {
        self.values = self.defaults.clone();
    }

    pub fn get(&self, key: &str) -> Result<&ConfigValue> {
        self.values.get(key).ok_or(Error::InvalidArgument)
    }

    pub fn set(&mut self, key: &str, value: ConfigValue) -> Result<()> {
        let (&k, default) = self.defaults.get_key_value(key).ok_or(Error::InvalidArgument)?;
        if !default.same_kind(&value) {
            return Err(Error::InvalidArgument);
        }
        self.values.insert(k, value);
        Ok(())
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.get(key)? {
            ConfigValue::Bool(v) => Ok(*v),
            _ => Err(Error::InvalidArgument),
        }
    }

    pub fn get_u8(&self, key: &str) -> Result<u8> {
        match self.get(key)? {
            ConfigValue::U8(v) => Ok(*v),
            _ => Err(Error::InvalidArgument),
        }
    }

    pub fn get_u32(&self, key: &str) -> Result<u32> {
        match self.get(key)? {
            ConfigValue::U32(v) => Ok(*v),
            _ => Err(Error::InvalidArgument),
        }
    }

    pub fn get_blob<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        match self.get(key)? {
            ConfigValue::Blob(v) => serde_json::from_value(v.clone()).map_err(|_| Error::Serialize),
            _ => Err(Error::InvalidArgument),
        }
    }

    pub fn set_bool(&mut self, key: &str, value: bool) -> Result<()> {
        self.set(key, ConfigValue::Bool(value))
    }

    pub fn set_u8(&mut self, key: &str, value: u8) -> Result<()> {
        self.set(key, ConfigValue::U8(value))
    }

    pub fn set_u32(&mut self, key: &str, value: u32) -> Result<()> {
        self.set(key, ConfigValue::U32(value))
    }

    pub fn set_blob<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let tree = serde_json::to_value(value).map_err(|_| Error::Serialize)?;
        self.set(key, ConfigValue::Blob(tree))
    }

    /// Reads both slots and adopts the newest valid image. Always leaves
    /// the store usable: anything unreadable falls back to defaults.
    pub fn load(&mut self) -> LoadOutcome {
        self.reset_to_defaults();
        self.active_slot = None;
        self.generation = 0;

        let mut best: Option<(usize, Header, Vec<Entry>)> = None;
        let mut saw_magic = false;
        for slot in 0..SLOTS {
            match self.read_slot(slot) {
                Ok(Some((header, entries))) => {
                    saw_magic = true;
                    if best.as_ref().is_none_or(|(_, b, _)| header.generation > b.generation) {
                        best = Some((slot, header, entries));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    saw_magic = true;
                    warn!("config: slot {=usize} rejected: {}", slot, e);
                }
            }
        }

        let Some((slot, header, entries)) = best else {
            return if saw_magic {
                warn!("config: no valid image, using defaults");
                LoadOutcome::Corrupt
            } else {
                info!("config: empty, using defaults");
                LoadOutcome::Empty
            };
        };

        for entry in entries {
            let Some((&key, default)) = self.defaults.get_key_value(entry.key.as_str()) else {
                debug!("config: ignoring unknown key");
                continue;
            };
            if !default.same_kind(&entry.value) {
                warn!("config: {=str} has type {=str}, expected {=str}", key, entry.value.kind(), default.kind());
                continue;
            }
            self.values.insert(key, entry.value);
        }
        self.active_slot = Some(slot);
        self.generation = header.generation;
        info!("config: loaded generation {=u32} from slot {=usize}", header.generation, slot);
        LoadOutcome::Loaded { generation: header.generation }
    }

    /// Writes the current values into the slot not holding the last image.
    pub fn save(&mut self) -> Result<()> {
        let entries: Vec<Entry> = self
            .values
            .iter()
            .map(|(k, v)| Entry { key: (*k).into(), value: v.clone() })
            .collect();
        let payload = serde_json::to_vec(&entries).map_err(|_| Error::Serialize)?;
        if payload.len() + HEADER_LEN > self.slot_size as usize {
            error!("config: image of {=usize} bytes does not fit", payload.len());
            return Err(Error::Storage);
        }
        let slot = match self.active_slot {
            Some(s) => (s + 1) % SLOTS,
            None => 0,
        };
        let header = Header {
            generation: self.generation.wrapping_add(1),
            length: payload.len() as u32,
            crc: CRC32.checksum(&payload),
        };
        let offset = self.slot_offset(slot);
        // payload first so a torn write leaves no valid header behind
        self.storage
            .write(offset + HEADER_LEN as u32, &payload)
            .map_err(|_| Error::Storage)?;
        self.storage.write(offset, &header.to_bytes()).map_err(|_| Error::Storage)?;
        self.active_slot = Some(slot);
        self.generation = header.generation;
        debug!("config: saved generation {=u32} to slot {=usize}", header.generation, slot);
        Ok(())
    }

    fn slot_offset(&self, slot: usize) -> u32 {
        self.base + slot as u32 * self.slot_size
    }

    /// `Ok(None)` for a blank slot.
    fn read_slot(&mut self, slot: usize) -> Result<Option<(Header, Vec<Entry>)>> {
        let offset = self.slot_offset(slot);
        let mut raw = [0u8; HEADER_LEN];
        self.storage.read(offset, &mut raw).map_err(|_| Error::Storage)?;
        let Some(header) = Header::parse(&raw) else {
            return Ok(None);
        };
        let len = header.length as usize;
        if len == 0 || len + HEADER_LEN > self.slot_size as usize {
            return Err(Error::Corrupt);
        }
        let mut payload = vec![0u8; len];
        self.storage
            .read(offset + HEADER_LEN as u32, &mut payload)
            .map_err(|_| Error::Storage)?;
        if CRC32.checksum(&payload) != header.crc {
            return Err(Error::Corrupt);
        }
        let entries = serde_json::from_slice(&payload).map_err(|_| Error::Corrupt)?;
        Ok(Some((header, entries)))
    }
}
