//! Exception-handler regions and the extra-data section codec (ECMA-335 II.25.4.5 / II.25.4.6).
//!
//! Inside a [`crate::il::Method`] an [`ExceptionHandler`] refers to its boundaries by
//! [`InstrId`], so inserting instructions in front of a region keeps it intact. On the wire a
//! clause is a set of offsets and lengths, represented here by [`RawClause`]. The decoder turns
//! raw clauses into handlers, the encoder turns handlers back into raw clauses once every
//! instruction has its final offset.
//!
//! # Section layout
//!
//! ```text
//! small: [kind:u8][dataSize:u8][reserved:u16] { [flags:u16][tryOff:u16][tryLen:u8][hOff:u16][hLen:u8][token:u32] }*
//! fat:   [kind:u8][dataSize:u24]              { [flags:u32][tryOff:u32][tryLen:u32][hOff:u32][hLen:u32][token:u32] }*
//! ```
//!
//! Sections start on a 4-byte boundary after the code and are chained with
//! [`SectionFlags::MORE_SECTS`].

use bitflags::bitflags;
use strum::Display;

use crate::{
    il::instruction::InstrId,
    io::{write_le_at, write_u24_at},
    parser::Parser,
    token::Token,
    Error, Result,
};

bitflags! {
    /// Kind of an exception-handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// Fault clause (finally that is called on exception only)
        const FAULT = 0x0004;
    }
}

bitflags! {
    /// Flags of an extra-data section following the method code.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        /// Exception handling data
        const EHTABLE = 0x01;
        /// Reserved, shall be 0
        const OPT_ILTABLE = 0x02;
        /// Data format is of the fat variety, meaning there is a 3-byte length least-significant byte first format
        const FAT_FORMAT = 0x40;
        /// Another data section occurs after this current section
        const MORE_SECTS = 0x80;
    }
}

/// One try/handler region of a method, with boundaries held by reference.
///
/// `try_end` and `handler_end` are exclusive and name the first instruction after the region;
/// `None` means the region runs to the end of the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// First instruction of the protected block
    pub try_start: InstrId,
    /// First instruction after the protected block
    pub try_end: Option<InstrId>,
    /// First instruction of the handler
    pub handler_start: InstrId,
    /// First instruction after the handler
    pub handler_end: Option<InstrId>,
    /// First instruction of the filter block, for [`ExceptionHandlerFlags::FILTER`] clauses
    pub filter_start: Option<InstrId>,
    /// Catch type for typed clauses, nil otherwise
    pub class_token: Token,
}

impl ExceptionHandler {
    /// True for filter clauses
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FILTER)
    }

    /// Every instruction reference held by the clause
    pub fn boundaries(&self) -> impl Iterator<Item = InstrId> + '_ {
        [
            Some(self.try_start),
            self.try_end,
            Some(self.handler_start),
            self.handler_end,
            self.filter_start,
        ]
        .into_iter()
        .flatten()
    }

    /// Replace every reference to `from` with `to`
    pub fn retarget(&mut self, from: InstrId, to: InstrId) {
        for slot in [&mut self.try_start, &mut self.handler_start] {
            if *slot == from {
                *slot = to;
            }
        }
        for slot in [&mut self.try_end, &mut self.handler_end, &mut self.filter_start] {
            if *slot == Some(from) {
                *slot = Some(to);
            }
        }
    }
}

/// A clause as stored in the binary section, with byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawClause {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Offset of the protected block
    pub try_offset: u32,
    /// Length of the protected block
    pub try_length: u32,
    /// Offset of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Catch type token, or filter offset for filter clauses
    pub class_token_or_filter: u32,
}

impl RawClause {
    fn fits_small(&self) -> bool {
        self.try_offset <= u32::from(u16::MAX)
            && self.try_length <= u32::from(u8::MAX)
            && self.handler_offset <= u32::from(u16::MAX)
            && self.handler_length <= u32::from(u8::MAX)
    }
}

/// Binary clause encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ClauseFormat {
    /// 12-byte clauses with 16-bit offsets and 8-bit lengths
    Small,
    /// 24-byte clauses with 32-bit fields
    Fat,
}

const SECTION_HEADER_SIZE: usize = 4;
const MAX_SMALL_DATA_SIZE: usize = u8::MAX as usize;
const MAX_FAT_DATA_SIZE: usize = 0x00FF_FFFF;

impl ClauseFormat {
    /// Pick the encoding for a clause list.
    ///
    /// Fat is the default. `compact` allows the small format when every clause and the
    /// resulting section size fit its narrower fields.
    #[must_use]
    pub fn select(clauses: &[RawClause], compact: bool) -> Self {
        let small_fits = clauses.iter().all(RawClause::fits_small)
            && ClauseFormat::Small.data_size(clauses.len()) <= MAX_SMALL_DATA_SIZE;
        if compact && small_fits {
            ClauseFormat::Small
        } else {
            ClauseFormat::Fat
        }
    }

    /// Size of a single clause
    #[must_use]
    pub fn clause_size(self) -> usize {
        match self {
            ClauseFormat::Small => 12,
            ClauseFormat::Fat => 24,
        }
    }

    /// Value of the section `dataSize` field for `count` clauses (header included)
    #[must_use]
    pub fn data_size(self, count: usize) -> usize {
        SECTION_HEADER_SIZE + count * self.clause_size()
    }

    fn section_flags(self) -> SectionFlags {
        match self {
            ClauseFormat::Small => SectionFlags::EHTABLE,
            ClauseFormat::Fat => SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT,
        }
    }
}

/// Read the chain of extra-data sections starting at the parser position.
///
/// The parser must be positioned right after the code; it is aligned to 4 bytes before each
/// section. Non-EH sections are skipped. Every clause of every EH section is returned in order.
///
/// # Errors
/// Returns [`crate::Error::Decode`] if a section header or clause is truncated or a data size
/// is smaller than the section header.
pub fn decode_sections(parser: &mut Parser) -> Result<Vec<RawClause>> {
    let mut clauses = Vec::new();

    loop {
        parser
            .align(4)
            .map_err(|_| decode_error!("Extra data section alignment runs past the body"))?;
        let kind = SectionFlags::from_bits_truncate(
            parser
                .read_le::<u8>()
                .map_err(|_| decode_error!("Missing extra data section header"))?,
        );

        let data_size = if kind.contains(SectionFlags::FAT_FORMAT) {
            let low = u32::from(read_section_byte(parser)?);
            let mid = u32::from(read_section_byte(parser)?);
            let high = u32::from(read_section_byte(parser)?);
            (low | (mid << 8) | (high << 16)) as usize
        } else {
            let size = read_section_byte(parser)? as usize;
            parser
                .advance_by(2)
                .map_err(|_| decode_error!("Truncated small section header"))?;
            size
        };

        if data_size < SECTION_HEADER_SIZE {
            return Err(decode_error!(
                "Extra data section size {} is smaller than its header",
                data_size
            ));
        }
        let payload = data_size - SECTION_HEADER_SIZE;
        if payload > parser.remaining() {
            return Err(decode_error!(
                "Extra data section of {} bytes exceeds the {} remaining bytes",
                data_size,
                parser.remaining() + SECTION_HEADER_SIZE
            ));
        }

        if kind.contains(SectionFlags::EHTABLE) {
            let format = if kind.contains(SectionFlags::FAT_FORMAT) {
                ClauseFormat::Fat
            } else {
                ClauseFormat::Small
            };
            if payload % format.clause_size() != 0 {
                return Err(decode_error!(
                    "{} EH section payload of {} bytes is not a whole number of clauses",
                    format,
                    payload
                ));
            }
            for _ in 0..payload / format.clause_size() {
                clauses.push(read_clause(parser, format)?);
            }
        } else {
            parser.advance_by(payload)?;
        }

        if !kind.contains(SectionFlags::MORE_SECTS) {
            return Ok(clauses);
        }
    }
}

fn read_section_byte(parser: &mut Parser) -> Result<u8> {
    parser
        .read_le::<u8>()
        .map_err(|_| decode_error!("Truncated extra data section header"))
}

fn read_clause(parser: &mut Parser, format: ClauseFormat) -> Result<RawClause> {
    let read = |parser: &mut Parser| -> Result<RawClause> {
        Ok(match format {
            ClauseFormat::Small => RawClause {
                flags: ExceptionHandlerFlags::from_bits_truncate(parser.read_le::<u16>()?),
                try_offset: u32::from(parser.read_le::<u16>()?),
                try_length: u32::from(parser.read_le::<u8>()?),
                handler_offset: u32::from(parser.read_le::<u16>()?),
                handler_length: u32::from(parser.read_le::<u8>()?),
                class_token_or_filter: parser.read_le::<u32>()?,
            },
            ClauseFormat::Fat => RawClause {
                // The upper half of the fat flags field is reserved
                flags: ExceptionHandlerFlags::from_bits_truncate(
                    (parser.read_le::<u32>()? & 0xFFFF) as u16,
                ),
                try_offset: parser.read_le::<u32>()?,
                try_length: parser.read_le::<u32>()?,
                handler_offset: parser.read_le::<u32>()?,
                handler_length: parser.read_le::<u32>()?,
                class_token_or_filter: parser.read_le::<u32>()?,
            },
        })
    };

    read(parser).map_err(|_| decode_error!("Truncated {} exception clause", format))
}

/// Write a single EH section holding every clause.
///
/// The caller is responsible for the 4-byte alignment of `offset`.
///
/// # Errors
/// Returns [`crate::Error::Encode`] if the data size does not fit the chosen format, or
/// [`crate::Error::OutOfBounds`] if `data` is too small.
pub fn encode_section(
    clauses: &[RawClause],
    format: ClauseFormat,
    data: &mut [u8],
    offset: &mut usize,
) -> Result<()> {
    let data_size = format.data_size(clauses.len());
    let limit = match format {
        ClauseFormat::Small => MAX_SMALL_DATA_SIZE,
        ClauseFormat::Fat => MAX_FAT_DATA_SIZE,
    };
    if data_size > limit {
        return Err(Error::Encode(format!(
            "{} clauses need an EH section of {} bytes, above the {} limit of {}",
            clauses.len(),
            data_size,
            format,
            limit
        )));
    }

    write_le_at(data, offset, format.section_flags().bits())?;
    match format {
        ClauseFormat::Small => {
            // Checked against MAX_SMALL_DATA_SIZE above
            #[allow(clippy::cast_possible_truncation)]
            write_le_at(data, offset, data_size as u8)?;
            write_le_at(data, offset, 0u16)?;
        }
        ClauseFormat::Fat => {
            // Checked against MAX_FAT_DATA_SIZE above
            #[allow(clippy::cast_possible_truncation)]
            write_u24_at(data, offset, data_size as u32)?;
        }
    }

    for clause in clauses {
        match format {
            // Range checked by ClauseFormat::select
            #[allow(clippy::cast_possible_truncation)]
            ClauseFormat::Small => {
                if !clause.fits_small() {
                    return Err(Error::Encode(format!(
                        "Clause {clause:?} does not fit the small format"
                    )));
                }
                write_le_at(data, offset, clause.flags.bits())?;
                write_le_at(data, offset, clause.try_offset as u16)?;
                write_le_at(data, offset, clause.try_length as u8)?;
                write_le_at(data, offset, clause.handler_offset as u16)?;
                write_le_at(data, offset, clause.handler_length as u8)?;
                write_le_at(data, offset, clause.class_token_or_filter)?;
            }
            ClauseFormat::Fat => {
                write_le_at(data, offset, u32::from(clause.flags.bits()))?;
                write_le_at(data, offset, clause.try_offset)?;
                write_le_at(data, offset, clause.try_length)?;
                write_le_at(data, offset, clause.handler_offset)?;
                write_le_at(data, offset, clause.handler_length)?;
                write_le_at(data, offset, clause.class_token_or_filter)?;
            }
        }
    }

    Ok(())
}
