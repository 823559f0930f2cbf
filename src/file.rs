//! JPEG/JFIF file front end.
//!
//! [`JpegParser`] walks the marker segments of a baseline file. [`PictureBuffers`] collects the
//! segments relevant for decoding into the fixed-layout parameter buffers that a client submits
//! to a decode context.

#![allow(non_snake_case)]

mod buffers;

use std::{fmt, mem};

use bytemuck::AnyBitPattern;

use crate::error::{Error, ErrorKind, Result};

pub use buffers::PictureBuffers;

fn malformed(msg: impl Into<String>) -> Error {
    Error::from((ErrorKind::MalformedBitstream, msg.into()))
}

fn eof() -> Error {
    malformed("reached end of data while decoding JPEG stream")
}

pub struct JpegParser<'a> {
    reader: Reader<'a>,
}

impl<'a> JpegParser<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let mut reader = Reader { buf, position: 0 };
        if reader.read_u8()? != 0xFF || reader.read_u8()? != 0xD8 {
            return Err(malformed("JPEG image does not start with SOI marker"));
        }
        Ok(Self { reader })
    }

    /// Reads the next [`Segment`].
    ///
    /// Returns `Ok(None)` once the EOI marker has been read. `SOI` and `EOI` themselves are never
    /// returned, and `RSTn` markers are part of the scan data of the preceding SOS segment.
    pub fn next_segment(&mut self) -> Result<Option<Segment<'a>>> {
        // Fill bytes may precede any marker.
        while self.reader.read_u8()? != 0xFF {}
        let mut marker = self.reader.read_u8()?;
        while marker == 0xFF {
            marker = self.reader.read_u8()?;
        }
        let offset = self.reader.position - 2;

        match marker {
            0x00 => return Err(malformed("invalid ff 00 marker")),
            0xD9 => {
                if !self.reader.remaining().is_empty() {
                    log::warn!(
                        "ignoring {} trailing bytes after EOI",
                        self.reader.remaining().len()
                    );
                }
                return Ok(None);
            }
            0x01 | 0xD0..=0xD8 => {
                return Err(malformed(format!(
                    "unexpected standalone marker ff {marker:02x}"
                )))
            }
            _ => {}
        }

        let length = usize::from(self.reader.read_length()?);
        let end = self.reader.position + length;
        let mut body = Reader {
            buf: &self.reader.buf[..end],
            position: self.reader.position,
        };
        let kind = match marker {
            0xDB => Some(SegmentKind::Dqt(read_dqt(&mut body)?)),
            0xC4 => Some(SegmentKind::Dht(read_dht(&mut body)?)),
            0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                Some(SegmentKind::Sof(read_sof(marker, &mut body)?))
            }
            0xDD => Some(SegmentKind::Dri(Dri {
                Ri: body.read_u16()?,
            })),
            0xDA => {
                let header = read_sos_header(&mut body)?;
                if body.position < end {
                    log::warn!("{} unused bytes in SOS header", end - body.position);
                }
                self.reader.position = end;
                let data = self.read_scan_data()?;
                return Ok(Some(Segment {
                    marker,
                    offset,
                    kind: Some(SegmentKind::Sos(Sos { data, ..header })),
                }));
            }
            // APPn, COM and anything else we do not interpret.
            _ => {
                body.position = end;
                None
            }
        };

        if body.position < end {
            log::warn!(
                "ff {marker:02x} segment specified a length of {length} bytes, but {} remain after decoding",
                end - body.position,
            );
        }
        self.reader.position = end;

        Ok(Some(Segment {
            marker,
            offset,
            kind,
        }))
    }

    /// Consumes entropy-coded data up to the next marker that is neither a stuffed `0xFF 0x00`
    /// nor an `RSTn` marker.
    fn read_scan_data(&mut self) -> Result<&'a [u8]> {
        let start = self.reader.position;
        loop {
            while self.reader.peek_u8(0)? != 0xFF {
                self.reader.position += 1;
            }
            let mut offset = 1;
            while self.reader.peek_u8(offset)? == 0xFF {
                offset += 1;
            }
            match self.reader.peek_u8(offset)? {
                0x00 | 0xD0..=0xD7 => self.reader.position += offset + 1,
                _ => {
                    // Leave the final `0xFF` (and its marker) for `next_segment`.
                    self.reader.position += offset - 1;
                    break;
                }
            }
        }
        Ok(&self.reader.buf[start..self.reader.position])
    }

    /// Returns the bytes that have not been parsed yet.
    pub fn remaining(&self) -> &'a [u8] {
        self.reader.remaining()
    }
}

fn read_dqt<'a>(body: &mut Reader<'a>) -> Result<Dqt<'a>> {
    let size = mem::size_of::<QuantizationTable>();
    let count = body.remaining().len() / size;
    if body.remaining().len() % size != 0 {
        return Err(Error::from((
            ErrorKind::Unsupported,
            format!(
                "DQT segment of {} bytes is not a multiple of {size} (16-bit tables are not supported)",
                body.remaining().len()
            ),
        )));
    }
    Ok(Dqt(body.read_objs(count)?))
}

fn read_dht<'a>(body: &mut Reader<'a>) -> Result<Dht<'a>> {
    let mut tables = Vec::new();
    while !body.remaining().is_empty() {
        let header: &DhtHeader = body.read_obj()?;
        let values = body.read_slice(header.num_values())?;
        tables.push(DhtTable {
            header,
            Vij: values,
        });
    }
    Ok(Dht { tables })
}

fn read_sof<'a>(marker: u8, body: &mut Reader<'a>) -> Result<Sof<'a>> {
    let P = body.read_u8()?;
    let Y = body.read_u16()?;
    let X = body.read_u16()?;
    let count = body.read_u8()?;
    let components = body.read_objs(count.into())?;
    Ok(Sof {
        sof: SofMarker(marker),
        P,
        Y,
        X,
        components,
    })
}

fn read_sos_header<'a>(body: &mut Reader<'a>) -> Result<Sos<'a>> {
    let count = body.read_u8()?;
    let components = body.read_objs(count.into())?;
    Ok(Sos {
        components,
        Ss: body.read_u8()?,
        Se: body.read_u8()?,
        AhAl: body.read_u8()?,
        data: &[],
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.position..]
    }

    fn peek_u8(&self, offset: usize) -> Result<u8> {
        self.buf
            .get(self.position + offset)
            .copied()
            .ok_or_else(eof)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = self.peek_u8(0)?;
        self.position += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes([self.read_u8()?, self.read_u8()?]))
    }

    fn read_slice(&mut self, count: usize) -> Result<&'a [u8]> {
        let slice = self.remaining().get(..count).ok_or_else(eof)?;
        self.position += count;
        Ok(slice)
    }

    fn read_obj<T: AnyBitPattern>(&mut self) -> Result<&'a T> {
        debug_assert_eq!(mem::align_of::<T>(), 1);
        let bytes = self.read_slice(mem::size_of::<T>())?;
        Ok(bytemuck::from_bytes(bytes))
    }

    fn read_objs<T: AnyBitPattern>(&mut self, count: usize) -> Result<&'a [T]> {
        debug_assert_eq!(mem::align_of::<T>(), 1);
        let bytes = self.read_slice(count * mem::size_of::<T>())?;
        Ok(bytemuck::cast_slice(bytes))
    }

    /// Reads a segment length and returns the number of bytes following it.
    fn read_length(&mut self) -> Result<u16> {
        // The length includes its own two bytes, but not the marker.
        let len = self.read_u16()?;
        if len < 2 {
            return Err(malformed(format!("invalid segment length {len}")));
        }
        if self.remaining().len() < usize::from(len - 2) {
            return Err(eof());
        }
        Ok(len - 2)
    }
}

/// A marker segment of a JPEG file.
#[derive(Debug)]
pub struct Segment<'a> {
    marker: u8,
    offset: usize,
    kind: Option<SegmentKind<'a>>,
}

impl<'a> Segment<'a> {
    /// Offset of the segment's `0xFF 0xXX` marker in the input.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The `0xXX` byte of the marker.
    #[inline]
    pub fn marker(&self) -> u8 {
        self.marker
    }

    /// The decoded segment, or `None` for segments that are skipped (`APPn`, `COM`, ...).
    #[inline]
    pub fn kind(&self) -> Option<&SegmentKind<'a>> {
        self.kind.as_ref()
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SegmentKind<'a> {
    Dqt(Dqt<'a>),
    Dht(Dht<'a>),
    Dri(Dri),
    Sof(Sof<'a>),
    Sos(Sos<'a>),
}

#[derive(Clone, Copy, AnyBitPattern)]
#[repr(C)]
pub struct QuantizationTable {
    PqTq: u8,
    Qk: [u8; 64],
}

impl QuantizationTable {
    /// Element precision: 0 for 8-bit, 1 for 16-bit values.
    #[inline]
    pub fn Pq(&self) -> u8 {
        self.PqTq >> 4
    }

    /// Destination slot (0-3).
    #[inline]
    pub fn Tq(&self) -> u8 {
        self.PqTq & 0xf
    }

    /// Table elements, in the order they are stored in the file.
    #[inline]
    pub fn Qk(&self) -> &[u8; 64] {
        &self.Qk
    }
}

impl fmt::Debug for QuantizationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantizationTable")
            .field("Pq", &self.Pq())
            .field("Tq", &self.Tq())
            .field("Qk", &format_args!("{:?}..", &self.Qk[..4]))
            .finish()
    }
}

/// **D**efine **Q**uantization **T**ables.
#[derive(Debug)]
pub struct Dqt<'a>(&'a [QuantizationTable]);

impl<'a> Dqt<'a> {
    #[inline]
    pub fn tables(&self) -> &'a [QuantizationTable] {
        self.0
    }
}

#[derive(Clone, Copy, AnyBitPattern)]
#[repr(C)]
struct DhtHeader {
    TcTh: u8,
    Li: [u8; 16],
}

impl DhtHeader {
    fn num_values(&self) -> usize {
        self.Li.iter().map(|&l| usize::from(l)).sum()
    }
}

/// One table of a DHT segment.
pub struct DhtTable<'a> {
    header: &'a DhtHeader,
    Vij: &'a [u8],
}

impl<'a> DhtTable<'a> {
    /// Table class: 0 = DC, 1 = AC.
    #[inline]
    pub fn Tc(&self) -> u8 {
        self.header.TcTh >> 4
    }

    /// Destination slot.
    #[inline]
    pub fn Th(&self) -> u8 {
        self.header.TcTh & 0xf
    }

    /// Number of codes of each length (1-16).
    #[inline]
    pub fn Li(&self) -> &'a [u8; 16] {
        &self.header.Li
    }

    /// Symbol values in code order.
    #[inline]
    pub fn Vij(&self) -> &'a [u8] {
        self.Vij
    }
}

impl<'a> fmt::Debug for DhtTable<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhtTable")
            .field("Tc", &self.Tc())
            .field("Th", &self.Th())
            .field("Li", self.Li())
            .field("Vij", &self.Vij)
            .finish()
    }
}

/// **D**efine **H**uffman **T**ables.
#[derive(Debug)]
pub struct Dht<'a> {
    tables: Vec<DhtTable<'a>>,
}

impl<'a> Dht<'a> {
    pub fn tables(&self) -> &[DhtTable<'a>] {
        &self.tables
    }
}

/// **D**efine **R**estart **I**nterval.
#[derive(Debug, Clone, Copy)]
pub struct Dri {
    Ri: u16,
}

impl Dri {
    /// Number of MCUs per restart interval (0 disables restart markers).
    #[inline]
    pub fn Ri(&self) -> u16 {
        self.Ri
    }
}

/// **S**tart **O**f **F**rame.
#[derive(Debug)]
pub struct Sof<'a> {
    sof: SofMarker,
    P: u8,
    Y: u16,
    X: u16,
    components: &'a [SofComponent],
}

impl<'a> Sof<'a> {
    #[inline]
    pub fn sof(&self) -> SofMarker {
        self.sof
    }

    /// Sample precision in bits.
    #[inline]
    pub fn P(&self) -> u8 {
        self.P
    }

    /// Number of lines.
    #[inline]
    pub fn Y(&self) -> u16 {
        self.Y
    }

    /// Samples per line.
    #[inline]
    pub fn X(&self) -> u16 {
        self.X
    }

    #[inline]
    pub fn components(&self) -> &'a [SofComponent] {
        self.components
    }
}

/// The coding process signalled by an SOF marker.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SofMarker(u8);

impl SofMarker {
    /// Baseline sequential DCT, Huffman coded.
    pub const SOF0: Self = Self(0xC0);
    /// Extended sequential DCT.
    pub const SOF1: Self = Self(0xC1);
    /// Progressive DCT.
    pub const SOF2: Self = Self(0xC2);
}

impl fmt::Debug for SofMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SOF{}", self.0 - 0xC0)
    }
}

#[derive(Clone, Copy, AnyBitPattern)]
#[repr(C)]
pub struct SofComponent {
    Ci: u8,
    HiVi: u8,
    Tqi: u8,
}

impl SofComponent {
    /// Component identifier, referenced by scan headers.
    #[inline]
    pub fn Ci(&self) -> u8 {
        self.Ci
    }

    #[inline]
    pub fn Hi(&self) -> u8 {
        self.HiVi >> 4
    }

    #[inline]
    pub fn Vi(&self) -> u8 {
        self.HiVi & 0xf
    }

    /// Quantization table slot (0-3).
    #[inline]
    pub fn Tqi(&self) -> u8 {
        self.Tqi
    }
}

impl fmt::Debug for SofComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "C{} {}x{} Tq{}",
            self.Ci,
            self.Hi(),
            self.Vi(),
            self.Tqi
        )
    }
}

/// **S**tart **O**f **S**can, followed by the entropy-coded data of the scan.
pub struct Sos<'a> {
    components: &'a [SosComponent],
    Ss: u8,
    Se: u8,
    AhAl: u8,
    data: &'a [u8],
}

impl<'a> Sos<'a> {
    #[inline]
    pub fn components(&self) -> &'a [SosComponent] {
        self.components
    }

    /// Start of spectral selection (0 for sequential scans).
    #[inline]
    pub fn Ss(&self) -> u8 {
        self.Ss
    }

    /// End of spectral selection (63 for sequential scans).
    #[inline]
    pub fn Se(&self) -> u8 {
        self.Se
    }

    #[inline]
    pub fn Ah(&self) -> u8 {
        self.AhAl >> 4
    }

    #[inline]
    pub fn Al(&self) -> u8 {
        self.AhAl & 0xf
    }

    /// The entropy-coded data, still byte-stuffed and including any `RSTn` markers.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> fmt::Debug for Sos<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sos")
            .field("components", &self.components)
            .field("Ss", &self.Ss)
            .field("Se", &self.Se)
            .field("Ah", &self.Ah())
            .field("Al", &self.Al())
            .field("data", &format_args!("{} bytes", self.data.len()))
            .finish()
    }
}

#[derive(Clone, Copy, AnyBitPattern)]
#[repr(C)]
pub struct SosComponent {
    Csj: u8,
    TdjTaj: u8,
}

impl SosComponent {
    /// The [`SofComponent::Ci`] of the component coded in this scan.
    #[inline]
    pub fn Csj(&self) -> u8 {
        self.Csj
    }

    /// DC table slot.
    #[inline]
    pub fn Tdj(&self) -> u8 {
        self.TdjTaj >> 4
    }

    /// AC table slot.
    #[inline]
    pub fn Taj(&self) -> u8 {
        self.TdjTaj & 0xf
    }
}

impl fmt::Debug for SosComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{} Td{} Ta{}", self.Csj, self.Tdj(), self.Taj())
    }
}
