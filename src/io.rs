//! Little-endian reading and writing of the primitive fields found in CIL method bodies.
//!
//! Method headers, operands and exception clauses are all little-endian. The functions here
//! take a byte slice plus a cursor and fail with [`crate::Error::OutOfBounds`] instead of
//! panicking when the buffer is too short.

use crate::{Error::OutOfBounds, Result};

/// Primitive types that can be read from and written to a method body.
pub trait CilIO: Sized + Copy {
    /// Fixed-size byte representation of the type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode a value from its little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode a value into its little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:literal),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
}

/// Read a little-endian value from the start of `data`
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than the value.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Read a little-endian value at `offset` and advance the offset past it
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value would extend past the end of `data`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Write a little-endian value to the start of `data`
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than the value.
pub fn write_le<T: CilIO>(data: &mut [u8], value: T) -> Result<()> {
    let mut offset = 0_usize;
    write_le_at(data, &mut offset, value)
}

/// Write a little-endian value at `offset` and advance the offset past it
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value would extend past the end of `data`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;

    Ok(())
}

/// Write the low 24 bits of `value` little-endian, as used by the EH section data size
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than three bytes remain.
pub fn write_u24_at(data: &mut [u8], offset: &mut usize, value: u32) -> Result<()> {
    let bytes = value.to_le_bytes();
    for byte in &bytes[..3] {
        write_le_at(data, offset, *byte)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_u8() {
        let result = read_le::<u8>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x01);
    }

    #[test]
    fn read_le_u16() {
        let result = read_le::<u16>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0201);
    }

    #[test]
    fn read_le_i32() {
        let result = read_le::<i32>(&[0xFE, 0xFF, 0xFF, 0xFF]).unwrap();
        assert_eq!(result, -2);
    }

    #[test]
    fn read_le_u64() {
        let result = read_le::<u64>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0807060504030201);
    }

    #[test]
    fn read_le_at_advances() {
        let mut offset = 2;
        let result = read_le_at::<u32>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(result, 0x06050403);
        assert_eq!(offset, 6);
    }

    #[test]
    fn read_le_out_of_bounds() {
        let mut offset = 6;
        let result = read_le_at::<u32>(&TEST_BUFFER, &mut offset);
        assert!(matches!(result, Err(Error::OutOfBounds)));
        assert_eq!(offset, 6);
    }

    #[test]
    fn read_le_offset_overflow() {
        let mut offset = usize::MAX;
        assert!(read_le_at::<u16>(&TEST_BUFFER, &mut offset).is_err());
    }

    #[test]
    fn write_le_roundtrip_fields() {
        let mut buffer = [0u8; 14];
        let mut offset = 0;
        write_le_at(&mut buffer, &mut offset, 0x3013u16).unwrap();
        write_le_at(&mut buffer, &mut offset, 0x0020u16).unwrap();
        write_le_at(&mut buffer, &mut offset, 5u32).unwrap();
        write_le_at(&mut buffer, &mut offset, -1i32).unwrap();
        assert_eq!(offset, 12);
        assert_eq!(
            &buffer[..12],
            &[0x13, 0x30, 0x20, 0x00, 0x05, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn write_le_out_of_bounds() {
        let mut buffer = [0u8; 3];
        assert!(matches!(
            write_le(&mut buffer, 1u32),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn write_u24() {
        let mut buffer = [0u8; 4];
        let mut offset = 1;
        write_u24_at(&mut buffer, &mut offset, 0x0012_341C).unwrap();
        assert_eq!(buffer, [0x00, 0x1C, 0x34, 0x12]);
        assert_eq!(offset, 4);
    }
}
