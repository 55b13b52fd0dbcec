//! Tiny and fat method headers (ECMA-335 II.25.4.2 / II.25.4.3).

use bitflags::bitflags;

use crate::{
    io::{read_le_at, write_le_at},
    token::Token,
    Error, Result,
};

bitflags! {
    /// Flags of the method header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodBodyFlags: u16 {
        /// Tiny header, one byte holding the code size
        const TINY_FORMAT = 0x2;
        /// Fat header, twelve bytes
        const FAT_FORMAT = 0x3;
        /// Extra data sections follow the code
        const MORE_SECTS = 0x8;
        /// Zero-initialize all locals
        const INIT_LOCALS = 0x10;
    }
}

/// Evaluation stack depth implied by a tiny header
pub const TINY_MAX_STACK: u16 = 8;
/// Largest code size a tiny header can describe
pub const TINY_MAX_CODE_SIZE: u32 = 0x3F;
/// Size of a fat header in bytes
pub const FAT_HEADER_SIZE: usize = 12;

const FORMAT_MASK: u8 = 0b11;
const FAT_FLAGS_MASK: u16 = 0x0FFF;
const FAT_SIZE_DWORDS: u16 = 3;

/// A decoded method header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodHeader {
    /// Header flags; only format, `MORE_SECTS` and `INIT_LOCALS` are meaningful
    pub flags: MethodBodyFlags,
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Size of the code in bytes
    pub code_size: u32,
    /// Locals signature, nil when the method has no locals
    pub local_var_sig: Token,
    /// Size of the header in bytes
    pub header_size: usize,
}

impl MethodHeader {
    /// Parse a header from the start of a method body
    ///
    /// # Errors
    /// Returns [`crate::Error::Decode`] if the body is empty, truncated, or the format bits
    /// are neither tiny nor fat.
    pub fn read(data: &[u8]) -> Result<Self> {
        let Some(&first_byte) = data.first() else {
            return Err(decode_error!("Provided data for body parsing is empty"));
        };

        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & FORMAT_MASK)) {
            MethodBodyFlags::TINY_FORMAT => Ok(MethodHeader {
                flags: MethodBodyFlags::TINY_FORMAT,
                max_stack: TINY_MAX_STACK,
                code_size: u32::from(first_byte >> 2),
                local_var_sig: Token::NULL,
                header_size: 1,
            }),
            MethodBodyFlags::FAT_FORMAT => {
                let mut offset = 0;
                let read = |offset: &mut usize| -> Result<(u16, u16, u32, u32)> {
                    Ok((
                        read_le_at::<u16>(data, offset)?,
                        read_le_at::<u16>(data, offset)?,
                        read_le_at::<u32>(data, offset)?,
                        read_le_at::<u32>(data, offset)?,
                    ))
                };
                let (flags_and_size, max_stack, code_size, local_var_sig) = read(&mut offset)
                    .map_err(|_| decode_error!("Fat header needs {} bytes", FAT_HEADER_SIZE))?;

                let size_dwords = flags_and_size >> 12;
                if size_dwords < FAT_SIZE_DWORDS {
                    return Err(decode_error!(
                        "Fat header declares {} dwords, at least {} are required",
                        size_dwords,
                        FAT_SIZE_DWORDS
                    ));
                }

                Ok(MethodHeader {
                    flags: MethodBodyFlags::from_bits_truncate(flags_and_size & FAT_FLAGS_MASK),
                    max_stack,
                    code_size,
                    local_var_sig: Token(local_var_sig),
                    header_size: usize::from(size_dwords) * 4,
                })
            }
            _ => Err(decode_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Build the header for a body, picking the tiny format whenever it is lossless.
    ///
    /// Tiny is chosen only without locals, init-locals, extra sections, with a stack depth of
    /// exactly 8 and fewer than 64 bytes of code.
    #[must_use]
    pub fn for_body(
        max_stack: u16,
        code_size: u32,
        local_var_sig: Option<Token>,
        init_locals: bool,
        more_sections: bool,
    ) -> Self {
        let init_locals = init_locals || local_var_sig.is_some();
        let tiny = !init_locals
            && !more_sections
            && max_stack == TINY_MAX_STACK
            && code_size <= TINY_MAX_CODE_SIZE;

        if tiny {
            return MethodHeader {
                flags: MethodBodyFlags::TINY_FORMAT,
                max_stack,
                code_size,
                local_var_sig: Token::NULL,
                header_size: 1,
            };
        }

        let mut flags = MethodBodyFlags::FAT_FORMAT;
        if more_sections {
            flags |= MethodBodyFlags::MORE_SECTS;
        }
        if init_locals {
            flags |= MethodBodyFlags::INIT_LOCALS;
        }

        MethodHeader {
            flags,
            max_stack,
            code_size,
            local_var_sig: local_var_sig.unwrap_or(Token::NULL),
            header_size: FAT_HEADER_SIZE,
        }
    }

    /// True for the one-byte header
    #[must_use]
    pub fn is_tiny(&self) -> bool {
        self.header_size == 1
    }

    /// Write the header at `offset`
    ///
    /// # Errors
    /// Returns [`crate::Error::Encode`] if a tiny header cannot hold the code size, or
    /// [`crate::Error::OutOfBounds`] if `data` is too small.
    pub fn write(&self, data: &mut [u8], offset: &mut usize) -> Result<()> {
        if self.is_tiny() {
            if self.code_size > TINY_MAX_CODE_SIZE {
                return Err(Error::Encode(format!(
                    "Code size {} does not fit a tiny header",
                    self.code_size
                )));
            }
            // Range checked above
            #[allow(clippy::cast_possible_truncation)]
            let byte = ((self.code_size as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8;
            return write_le_at(data, offset, byte);
        }

        let flags_and_size = (FAT_SIZE_DWORDS << 12) | (self.flags.bits() & FAT_FLAGS_MASK);
        write_le_at(data, offset, flags_and_size)?;
        write_le_at(data, offset, self.max_stack)?;
        write_le_at(data, offset, self.code_size)?;
        write_le_at(data, offset, self.local_var_sig.value())
    }
}
