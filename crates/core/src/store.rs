//! Binary store/load contract for restartable values
//!
//! [`DataStore`] is the per-type codec seam. Every type that can live in a
//! restartable map implements it, either directly (numbers, strings,
//! containers below) or by wrapping a serde type in [`Bincode`].
//!
//! # Binary Format
//!
//! - Integers and floats: little-endian fixed width (`usize`/`isize` as 64-bit)
//! - `bool`: one byte, 0 or 1
//! - Strings and containers: u64 length prefix followed by the elements
//! - `Option`: u8 tag (0 = None, 1 = Some) followed by the value
//!
//! Loading decodes *into* an existing value, so types with interior
//! structure (pre-sized arrays, pre-built objects) keep anything the
//! encoding does not cover.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque context handed to custom store/load routines
pub type StoreContext<'a> = Option<&'a (dyn Any + Send + Sync)>;

/// Type-specific binary codec
///
/// Implement this for your own types to make them restartable. The
/// `*_with_context` hooks receive the context attached at declaration time
/// and default to the context-free methods.
pub trait DataStore {
    /// Encode `self` into `w`
    fn store(&self, w: &mut dyn Write) -> Result<()>;

    /// Decode from `r` into `self`
    fn load(&mut self, r: &mut dyn Read) -> Result<()>;

    /// Encode with the declaration context available
    fn store_with_context(&self, w: &mut dyn Write, _context: StoreContext<'_>) -> Result<()> {
        self.store(w)
    }

    /// Decode with the declaration context available
    fn load_with_context(&mut self, r: &mut dyn Read, _context: StoreContext<'_>) -> Result<()> {
        self.load(r)
    }
}

// ============================================================================
// Stream primitives
// ============================================================================

/// Write a single byte
pub fn write_u8(w: &mut dyn Write, v: u8) -> Result<()> {
    w.write_all(&[v])?;
    Ok(())
}

/// Write a little-endian u32
pub fn write_u32(w: &mut dyn Write, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian u64
pub fn write_u64(w: &mut dyn Write, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a length prefix
pub fn write_len(w: &mut dyn Write, len: usize) -> Result<()> {
    write_u64(w, len as u64)
}

/// Write a length-prefixed UTF-8 string
pub fn write_str(w: &mut dyn Write, s: &str) -> Result<()> {
    write_len(w, s.len())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

/// Write a length-prefixed byte blob
pub fn write_bytes(w: &mut dyn Write, bytes: &[u8]) -> Result<()> {
    write_len(w, bytes.len())?;
    w.write_all(bytes)?;
    Ok(())
}

/// Read a single byte
pub fn read_u8(r: &mut dyn Read, what: &'static str) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(|e| Error::from_read(e, what))?;
    Ok(buf[0])
}

/// Read a little-endian u32
pub fn read_u32(r: &mut dyn Read, what: &'static str) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|e| Error::from_read(e, what))?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a little-endian u64
pub fn read_u64(r: &mut dyn Read, what: &'static str) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|e| Error::from_read(e, what))?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a length prefix
pub fn read_len(r: &mut dyn Read, what: &'static str) -> Result<usize> {
    let len = read_u64(r, what)?;
    usize::try_from(len)
        .map_err(|_| Error::InvalidEncoding(format!("{} length {} exceeds usize", what, len)))
}

/// Read a length-prefixed byte blob
///
/// The blob is read through `take` so a corrupt length cannot trigger a
/// huge up-front allocation.
pub fn read_bytes(r: &mut dyn Read, what: &'static str) -> Result<Vec<u8>> {
    let len = read_len(r, what)?;
    let mut buf = Vec::with_capacity(len.min(64 * 1024));
    let read = (&mut *r).take(len as u64).read_to_end(&mut buf)?;
    if read != len {
        return Err(Error::UnexpectedEof(what));
    }
    Ok(buf)
}

/// Read a length-prefixed UTF-8 string
pub fn read_string(r: &mut dyn Read, what: &'static str) -> Result<String> {
    let bytes = read_bytes(r, what)?;
    String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
}

// ============================================================================
// Scalars
// ============================================================================

macro_rules! impl_data_store_le {
    ($($t:ty),* $(,)?) => {
        $(
            impl DataStore for $t {
                fn store(&self, w: &mut dyn Write) -> Result<()> {
                    w.write_all(&self.to_le_bytes())?;
                    Ok(())
                }

                fn load(&mut self, r: &mut dyn Read) -> Result<()> {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    r.read_exact(&mut buf)
                        .map_err(|e| Error::from_read(e, stringify!($t)))?;
                    *self = <$t>::from_le_bytes(buf);
                    Ok(())
                }
            }
        )*
    };
}

impl_data_store_le!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl DataStore for usize {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        write_u64(w, *self as u64)
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        *self = read_len(r, "usize")?;
        Ok(())
    }
}

impl DataStore for isize {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        (*self as i64).store(w)
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        let mut v = 0i64;
        v.load(r)?;
        *self = isize::try_from(v)
            .map_err(|_| Error::InvalidEncoding(format!("isize value {} out of range", v)))?;
        Ok(())
    }
}

impl DataStore for bool {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        write_u8(w, u8::from(*self))
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        *self = match read_u8(r, "bool")? {
            0 => false,
            1 => true,
            other => return Err(Error::InvalidEncoding(format!("bool byte {}", other))),
        };
        Ok(())
    }
}

impl DataStore for char {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        write_u32(w, u32::from(*self))
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        let code = read_u32(r, "char")?;
        *self = char::from_u32(code)
            .ok_or_else(|| Error::InvalidEncoding(format!("char code point {:#x}", code)))?;
        Ok(())
    }
}

impl DataStore for () {
    fn store(&self, _w: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    fn load(&mut self, _r: &mut dyn Read) -> Result<()> {
        Ok(())
    }
}

impl DataStore for String {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        write_str(w, self)
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        *self = read_string(r, "String")?;
        Ok(())
    }
}

// ============================================================================
// Containers
// ============================================================================

impl<T: DataStore + Default> DataStore for Vec<T> {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        write_len(w, self.len())?;
        for item in self {
            item.store(w)?;
        }
        Ok(())
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        let len = read_len(r, "Vec length")?;
        // Reuse existing elements so partially pre-built contents survive.
        self.truncate(len);
        for item in self.iter_mut() {
            item.load(r)?;
        }
        while self.len() < len {
            let mut item = T::default();
            item.load(r)?;
            self.push(item);
        }
        Ok(())
    }
}

impl<T: DataStore + Default> DataStore for VecDeque<T> {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        write_len(w, self.len())?;
        for item in self {
            item.store(w)?;
        }
        Ok(())
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        let len = read_len(r, "VecDeque length")?;
        self.clear();
        for _ in 0..len {
            let mut item = T::default();
            item.load(r)?;
            self.push_back(item);
        }
        Ok(())
    }
}

impl<T: DataStore, const N: usize> DataStore for [T; N] {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        write_len(w, N)?;
        for item in self {
            item.store(w)?;
        }
        Ok(())
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        let len = read_len(r, "array length")?;
        if len != N {
            return Err(Error::InvalidEncoding(format!(
                "array of length {} stored, expected {}",
                len, N
            )));
        }
        for item in self.iter_mut() {
            item.load(r)?;
        }
        Ok(())
    }
}

impl<T: DataStore + Default> DataStore for Option<T> {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        match self {
            None => write_u8(w, 0),
            Some(value) => {
                write_u8(w, 1)?;
                value.store(w)
            }
        }
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        match read_u8(r, "Option tag")? {
            0 => {
                *self = None;
                Ok(())
            }
            1 => self.get_or_insert_with(T::default).load(r),
            other => Err(Error::InvalidEncoding(format!("Option tag {}", other))),
        }
    }
}

impl<T: DataStore + ?Sized> DataStore for Box<T> {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        (**self).store(w)
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        (**self).load(r)
    }
}

impl<A: DataStore, B: DataStore> DataStore for (A, B) {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        self.0.store(w)?;
        self.1.store(w)
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        self.0.load(r)?;
        self.1.load(r)
    }
}

impl<A: DataStore, B: DataStore, C: DataStore> DataStore for (A, B, C) {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        self.0.store(w)?;
        self.1.store(w)?;
        self.2.store(w)
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        self.0.load(r)?;
        self.1.load(r)?;
        self.2.load(r)
    }
}

impl<K, V> DataStore for BTreeMap<K, V>
where
    K: DataStore + Default + Ord,
    V: DataStore + Default,
{
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        write_len(w, self.len())?;
        for (key, value) in self {
            key.store(w)?;
            value.store(w)?;
        }
        Ok(())
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        let len = read_len(r, "BTreeMap length")?;
        self.clear();
        for _ in 0..len {
            let mut key = K::default();
            key.load(r)?;
            let mut value = V::default();
            value.load(r)?;
            self.insert(key, value);
        }
        Ok(())
    }
}

impl<K, V, S> DataStore for HashMap<K, V, S>
where
    K: DataStore + Default + Eq + Hash,
    V: DataStore + Default,
    S: BuildHasher,
{
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        write_len(w, self.len())?;
        for (key, value) in self {
            key.store(w)?;
            value.store(w)?;
        }
        Ok(())
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        let len = read_len(r, "HashMap length")?;
        self.clear();
        for _ in 0..len {
            let mut key = K::default();
            key.load(r)?;
            let mut value = V::default();
            value.load(r)?;
            self.insert(key, value);
        }
        Ok(())
    }
}

impl<T: DataStore + Default + Ord> DataStore for BTreeSet<T> {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        write_len(w, self.len())?;
        for item in self {
            item.store(w)?;
        }
        Ok(())
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        let len = read_len(r, "BTreeSet length")?;
        self.clear();
        for _ in 0..len {
            let mut item = T::default();
            item.load(r)?;
            self.insert(item);
        }
        Ok(())
    }
}

impl<T, S> DataStore for HashSet<T, S>
where
    T: DataStore + Default + Eq + Hash,
    S: BuildHasher,
{
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        write_len(w, self.len())?;
        for item in self {
            item.store(w)?;
        }
        Ok(())
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        let len = read_len(r, "HashSet length")?;
        self.clear();
        for _ in 0..len {
            let mut item = T::default();
            item.load(r)?;
            self.insert(item);
        }
        Ok(())
    }
}

// ============================================================================
// Generic serde encoder
// ============================================================================

/// Adapter that stores any serde type with bincode
///
/// Use this for plain aggregate types that have no reason to hand-write a
/// [`DataStore`] impl:
///
/// ```ignore
/// #[derive(Default, Serialize, Deserialize)]
/// struct Stats { steps: u64, residual: f64 }
///
/// let stats = object.declare_restartable_data(&mut registry, "stats", Bincode::<Stats>::default)?;
/// stats.steps += 1;
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bincode<T>(pub T);

impl<T> Bincode<T> {
    /// Unwrap the inner value
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Bincode<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Bincode<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: Serialize + DeserializeOwned> DataStore for Bincode<T> {
    fn store(&self, w: &mut dyn Write) -> Result<()> {
        let bytes = bincode::serialize(&self.0)?;
        write_bytes(w, &bytes)
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        let bytes = read_bytes(r, "bincode payload")?;
        self.0 = bincode::deserialize(&bytes)?;
        Ok(())
    }
}
