use std::{
    fmt,
    io::{self, Read},
};

use byteorder::{ReadBytesExt, LE};
use uuid::Uuid;

/// primitive_enum! {}
macro_rules! primitive_enum {
    (
        $( #[$enum_attrs:meta] )*
        $v:vis enum $name:ident: $native:ty {
            $(
                $( #[$variant_attrs:meta] )*
                $variant:ident = $value:expr
            ),+
            $(,)?
        }
    ) => {
        $( #[$enum_attrs] )*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        $v enum $name {
            $(
                $( #[$variant_attrs] )*
                $variant = $value,
            )+
        }

        impl $name {
            pub(crate) fn from_raw(raw: $native) -> Option<Self> {
                match raw {
                    $(
                        $value => Some(Self::$variant),
                    )+
                    _ => None,
                }
            }
        }

        #[allow(unreachable_patterns)]
        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match *self {
                    $(
                        Self::$variant => f.write_str(stringify!($variant)),
                    )+
                }
            }
        }
    };
}

/// Splits a run of concatenated descriptors into `(bDescriptorType, descriptor bytes)` pairs.
///
/// Iteration stops at the first descriptor whose declared length does not fit the remaining data.
pub(crate) fn split_descriptors(mut raw: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    std::iter::from_fn(move || match raw {
        [length, descriptor_type, ..] => {
            let length = *length as usize;
            if length > raw.len() {
                log::warn!(
                    "descriptor length {} exceeds available data ({} bytes)",
                    length,
                    raw.len()
                );
                return None;
            }
            if length < 2 {
                log::warn!("descriptor with invalid length {}, stopping", length);
                return None;
            }
            let (desc_data, next) = raw.split_at(length);

            raw = next;

            Some((*descriptor_type, desc_data))
        }
        [] => None,
        _ => {
            log::warn!("invalid trailing descriptor bytes: {:x?}", raw);
            None
        }
    })
}

pub(crate) trait BytesExt {
    fn read_bitmask(&mut self, len: u8) -> io::Result<u32>;
    fn read_guid(&mut self) -> io::Result<Uuid>;
}

impl BytesExt for &'_ [u8] {
    fn read_bitmask(&mut self, len: u8) -> io::Result<u32> {
        let len = usize::from(len);
        if len > self.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if len > 4 {
            log::warn!("bitmask length {}, discarding data past 32 bits", len);
        }

        let (bytes, rest) = self.split_at(len);
        *self = rest;

        let mut buf = [0u8; 4];
        buf.iter_mut()
            .zip(bytes)
            .for_each(|(dest, src)| *dest = *src);
        Ok(u32::from_le_bytes(buf))
    }

    fn read_guid(&mut self) -> io::Result<Uuid> {
        // Weird encoding, apparently the first 3 groups in a UUID are "numbers", the last 2 groups
        // are just "bytes", and USB-IF insists on encoding all numbers in little endian.
        let d1 = self.read_u32::<LE>()?;
        let d2 = self.read_u16::<LE>()?;
        let d3 = self.read_u16::<LE>()?;
        let mut d4 = [0; 8];
        self.read_exact(&mut d4)?;

        let mut bytes = [0; 16];
        bytes[0..4].copy_from_slice(&d1.to_be_bytes());
        bytes[4..6].copy_from_slice(&d2.to_be_bytes());
        bytes[6..8].copy_from_slice(&d3.to_be_bytes());
        bytes[8..].copy_from_slice(&d4);
        Ok(Uuid::from_bytes(bytes))
    }
}

/// Bounds-checked little-endian reader over a single descriptor.
///
/// Reads past the end yield zeroes and latch the overrun flag instead of failing, so a truncated
/// descriptor still produces a (flagged) value for every field.
pub(crate) struct DescReader<'a> {
    raw: &'a [u8],
    overrun: bool,
}

impl<'a> DescReader<'a> {
    pub(crate) fn new(raw: &'a [u8]) -> Self {
        Self {
            raw,
            overrun: false,
        }
    }

    /// Whether any read ran past the end of the descriptor.
    pub(crate) fn overrun(&self) -> bool {
        self.overrun
    }

    fn latch<T: Default>(&mut self, res: io::Result<T>) -> T {
        res.unwrap_or_else(|_| {
            self.overrun = true;
            self.raw = &[];
            T::default()
        })
    }

    pub(crate) fn u8(&mut self) -> u8 {
        let res = self.raw.read_u8();
        self.latch(res)
    }

    pub(crate) fn u16(&mut self) -> u16 {
        let res = self.raw.read_u16::<LE>();
        self.latch(res)
    }

    pub(crate) fn u32(&mut self) -> u32 {
        let res = self.raw.read_u32::<LE>();
        self.latch(res)
    }

    pub(crate) fn bitmask(&mut self, len: u8) -> u32 {
        let res = self.raw.read_bitmask(len);
        self.latch(res)
    }

    pub(crate) fn guid(&mut self) -> Uuid {
        match self.raw.read_guid() {
            Ok(guid) => guid,
            Err(_) => {
                self.overrun = true;
                self.raw = &[];
                Uuid::nil()
            }
        }
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Vec<u8> {
        if len > self.raw.len() {
            self.overrun = true;
            self.raw = &[];
            return Vec::new();
        }
        let (bytes, rest) = self.raw.split_at(len);
        self.raw = rest;
        bytes.to_vec()
    }

    pub(crate) fn u32_array(&mut self, count: usize) -> Vec<u32> {
        let mut values = Vec::with_capacity(count.min(self.raw.len() / 4));
        for _ in 0..count {
            let value = self.u32();
            if self.overrun {
                break;
            }
            values.push(value);
        }
        values
    }
}

/// Converts a UVC frame interval (in 100 ns units) into a frame rate in Hz.
pub fn interval_to_frequency(interval: u32) -> f64 {
    if interval == 0 {
        return 0.0;
    }
    10_000_000.0 / f64::from(interval)
}

/// Converts a frame rate in Hz into the closest UVC frame interval (in 100 ns units).
pub fn frequency_to_interval(frequency: f64) -> u32 {
    if frequency <= 0.0 {
        return 0;
    }
    (10_000_000.0 / frequency).round().min(f64::from(u32::MAX)) as u32
}

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct BcdVersion(pub(crate) u16);

impl BcdVersion {
    pub fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for BcdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let maj = self.0 >> 8;
        let min = self.0 & 0xff;
        write!(f, "{}.{:02x}", maj, min)
    }
}

impl fmt::Debug for BcdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
