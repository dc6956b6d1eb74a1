//! Typed views over little-endian buffer bytes.
//!
//! `Element` ties a Rust scalar type to its [`DataType`] so buffers can be
//! built from and read back into typed vectors without unsafe casts.

use crate::types::DataType;

// ── BF16 / F16 newtypes ────────────────────────────────────────────────

/// Brain floating-point 16: sign(1) + exponent(8) + mantissa(7).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bf16(pub u16);

impl Bf16 {
    #[inline]
    pub fn from_f32(v: f32) -> Self {
        let bits = v.to_bits();
        // Round-to-nearest-even: add rounding bias then truncate.
        let rounded = bits.wrapping_add(0x7FFF + ((bits >> 16) & 1));
        Bf16((rounded >> 16) as u16)
    }

    #[inline]
    pub fn to_f32(self) -> f32 {
        f32::from_bits((self.0 as u32) << 16)
    }
}

/// IEEE 754 half-precision float: sign(1) + exponent(5) + mantissa(10).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct F16(pub u16);

impl F16 {
    #[inline]
    pub fn from_f32(v: f32) -> Self {
        let bits = v.to_bits();
        let sign = (bits >> 16) & 0x8000;
        let exponent = ((bits >> 23) & 0xFF) as i32;
        let mantissa = bits & 0x007F_FFFF;

        if exponent == 0xFF {
            let h_mantissa = if mantissa != 0 { 0x0200 } else { 0 };
            return F16((sign | 0x7C00 | h_mantissa) as u16);
        }

        let unbiased = exponent - 127;
        if unbiased > 15 {
            return F16((sign | 0x7C00) as u16);
        }
        if unbiased < -24 {
            return F16(sign as u16);
        }
        if unbiased < -14 {
            let shift = -1 - unbiased;
            let m = (mantissa | 0x0080_0000) >> (shift + 13);
            return F16((sign | m) as u16);
        }

        let h_exp = ((unbiased + 15) as u32) << 10;
        let h_man = mantissa >> 13;
        let round_bit = (mantissa >> 12) & 1;
        F16((sign | h_exp | (h_man + round_bit)) as u16)
    }

    #[inline]
    pub fn to_f32(self) -> f32 {
        let h = self.0 as u32;
        let sign = (h & 0x8000) << 16;
        let exponent = (h >> 10) & 0x1F;
        let mantissa = h & 0x03FF;

        if exponent == 0 {
            if mantissa == 0 {
                return f32::from_bits(sign);
            }
            // Subnormal: normalize.
            let mut m = mantissa;
            let mut e: i32 = -14 + 127;
            while m & 0x0400 == 0 {
                m <<= 1;
                e -= 1;
            }
            m &= 0x03FF;
            return f32::from_bits(sign | ((e as u32) << 23) | (m << 13));
        }

        if exponent == 31 {
            let f_man = if mantissa != 0 { 0x0040_0000 } else { 0 };
            return f32::from_bits(sign | 0x7F80_0000 | f_man);
        }

        let f_exp = (exponent + 127 - 15) << 23;
        f32::from_bits(sign | f_exp | (mantissa << 13))
    }
}

// ── Element trait ──────────────────────────────────────────────────────

/// A scalar type that can live inside a [`Tensor`](super::Tensor).
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DataType;

    /// Read from a little-endian byte slice of exactly `DTYPE.size_in_bytes()`.
    fn read_le(bytes: &[u8]) -> Self;

    /// Write into a little-endian byte slice of exactly `DTYPE.size_in_bytes()`.
    fn write_le(self, bytes: &mut [u8]);

    /// Widen to `f64` for closeness comparisons.
    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),*) => {
        $(
            impl Element for $ty {
                const DTYPE: DataType = DataType::$dtype;

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    Self::from_le_bytes(
                        bytes.try_into().expect("slice length matches type size"),
                    )
                }

                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_element!(
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u32 => U32,
    u64 => U64
);

impl Element for bool {
    const DTYPE: DataType = DataType::Bool;

    #[inline]
    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    #[inline]
    fn write_le(self, bytes: &mut [u8]) {
        bytes[0] = self as u8;
    }

    #[inline]
    fn to_f64(self) -> f64 {
        if self { 1.0 } else { 0.0 }
    }
}

impl Element for Bf16 {
    const DTYPE: DataType = DataType::BF16;

    #[inline]
    fn read_le(bytes: &[u8]) -> Self {
        Bf16(u16::from_le_bytes(
            bytes.try_into().expect("slice length matches type size"),
        ))
    }

    #[inline]
    fn write_le(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.0.to_le_bytes());
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
}

impl Element for F16 {
    const DTYPE: DataType = DataType::F16;

    #[inline]
    fn read_le(bytes: &[u8]) -> Self {
        F16(u16::from_le_bytes(
            bytes.try_into().expect("slice length matches type size"),
        ))
    }

    #[inline]
    fn write_le(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.0.to_le_bytes());
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
}

/// Widen a single element of `dtype` stored at `bytes` to `f64`.
pub(crate) fn element_to_f64(dtype: DataType, bytes: &[u8]) -> f64 {
    match dtype {
        DataType::F32 => f32::read_le(bytes).to_f64(),
        DataType::F64 => f64::read_le(bytes),
        DataType::F16 => F16::read_le(bytes).to_f64(),
        DataType::BF16 => Bf16::read_le(bytes).to_f64(),
        DataType::I8 => i8::read_le(bytes).to_f64(),
        DataType::I32 => i32::read_le(bytes).to_f64(),
        DataType::I64 => i64::read_le(bytes).to_f64(),
        DataType::U8 => u8::read_le(bytes).to_f64(),
        DataType::U32 => u32::read_le(bytes).to_f64(),
        DataType::U64 => u64::read_le(bytes).to_f64(),
        DataType::Bool => bool::read_le(bytes).to_f64(),
    }
}
