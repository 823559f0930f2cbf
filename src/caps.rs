//! Supported profiles, entrypoints, config attributes and buffer types.

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    Mpeg2Simple,
    Mpeg2Main,
    Mpeg4Simple,
    Mpeg4AdvancedSimple,
    Mpeg4Main,
    H264Baseline,
    H264Main,
    H264High,
    Vc1Simple,
    Vc1Main,
    Vc1Advanced,
    JpegBaseline,
}

impl Profile {
    pub const ALL: [Profile; 12] = [
        Profile::Mpeg2Simple,
        Profile::Mpeg2Main,
        Profile::Mpeg4Simple,
        Profile::Mpeg4AdvancedSimple,
        Profile::Mpeg4Main,
        Profile::H264Baseline,
        Profile::H264Main,
        Profile::H264High,
        Profile::Vc1Simple,
        Profile::Vc1Main,
        Profile::Vc1Advanced,
        Profile::JpegBaseline,
    ];

    /// Returns the entrypoints this driver accepts for the profile.
    pub fn entrypoints(self) -> &'static [Entrypoint] {
        match self {
            Profile::Mpeg2Simple | Profile::Mpeg2Main => &[Entrypoint::Vld, Entrypoint::MoComp],
            Profile::H264Baseline | Profile::H264Main | Profile::H264High => {
                &[Entrypoint::Vld, Entrypoint::EncSlice]
            }
            Profile::Mpeg4Simple
            | Profile::Mpeg4AdvancedSimple
            | Profile::Mpeg4Main
            | Profile::Vc1Simple
            | Profile::Vc1Main
            | Profile::Vc1Advanced
            | Profile::JpegBaseline => &[Entrypoint::Vld],
        }
    }

    pub(crate) fn check_entrypoint(self, entrypoint: Entrypoint) -> Result<()> {
        if self.entrypoints().contains(&entrypoint) {
            Ok(())
        } else {
            Err(Error::from((
                ErrorKind::Unsupported,
                format!("entrypoint {entrypoint:?} is not supported for profile {self:?}"),
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entrypoint {
    /// Variable-length (bitstream) decoding.
    Vld,
    /// Motion compensation.
    MoComp,
    /// Slice-level encoding.
    EncSlice,
}

/// Render-target pixel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtFormat(pub u32);

impl RtFormat {
    pub const YUV420: Self = Self(0x0000_0001);
    pub const YUV422: Self = Self(0x0000_0002);
    pub const YUV444: Self = Self(0x0000_0004);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigAttribType {
    RtFormat,
    SpatialResidual,
    SpatialClipping,
    IntraResidual,
    Encryption,
    RateControl,
}

/// Value reported for attributes the driver does not implement.
pub const ATTRIB_NOT_SUPPORTED: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigAttrib {
    pub kind: ConfigAttribType,
    pub value: u32,
}

impl ConfigAttrib {
    pub fn new(kind: ConfigAttribType, value: u32) -> Self {
        Self { kind, value }
    }
}

/// Declared content of a client buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BufferType {
    PictureParameter,
    IqMatrix,
    BitPlane,
    SliceGroupMap,
    SliceParameter,
    SliceData,
    MacroblockParameter,
    ResidualData,
    DeblockingParameter,
    Image,
    ProtectedSliceData,
    QMatrix,
    HuffmanTable,
    Probability,
    EncCoded,
    EncSequenceParameter,
    EncPictureParameter,
    EncSliceParameter,
}

impl BufferType {
    /// Whether buffers of this type can be created at all.
    pub fn is_supported(self) -> bool {
        !matches!(self, BufferType::Probability | BufferType::EncCoded)
    }
}
