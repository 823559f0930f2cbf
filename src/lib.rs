//! A software baseline-JPEG decode driver with the object model of a video acceleration API.
//!
//! Clients create configs, surfaces, contexts and buffers through a [`Driver`] and receive opaque
//! handles for them. A picture is decoded by opening it on a context with
//! [`Driver::begin_picture`], submitting parameter and slice buffers with
//! [`Driver::render_picture`] (possibly over several calls), and finally calling
//! [`Driver::end_picture`], which runs the decoder and stores the RGB result in the render-target
//! surface.
//!
//! Submitting a buffer hands its data over to the context: the buffer handle is destroyed, while
//! the bytes stay alive for as long as the context references them.
//!
//! [`PictureBuffers`] turns a JFIF file into the buffers a client would submit, and
//! [`Driver::decode_jpeg`] runs the whole sequence in one call.

mod bits;
mod caps;
mod color;
mod decode;
mod error;
pub mod file;
mod heap;
mod huffman;
mod idct;
mod image;
pub mod params;
mod scan;
mod session;
mod store;
mod surface;
#[cfg(test)]
mod tests;

use std::{mem, rc::Rc};

use heap::{ObjectId, SlotHeap, MAX_SLOTS};
use session::CodecState;
use store::{BufferStore, StoreRef};
use surface::Surface;

pub use caps::{
    BufferType, ConfigAttrib, ConfigAttribType, Entrypoint, Profile, RtFormat,
    ATTRIB_NOT_SUPPORTED,
};
pub use decode::DecodeSummary;
pub use error::{Error, ErrorKind, Result};
pub use file::PictureBuffers;
pub use heap::{BufferId, ConfigId, ContextId, SurfaceId};
pub use image::Image;
pub use surface::{Frame, Present, SurfaceStatus};

pub const MAX_PROFILES: usize = 12;
pub const MAX_ENTRYPOINTS: usize = 5;
pub const MAX_CONFIG_ATTRIBUTES: usize = 10;
pub const VENDOR: &str = "vajpeg software JPEG driver";

/// Resource limits of a [`Driver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of live objects of each kind (configs, contexts, surfaces, buffers).
    pub max_objects: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_objects: MAX_SLOTS - 1,
        }
    }
}

struct Config {
    profile: Profile,
    entrypoint: Entrypoint,
    attribs: Vec<ConfigAttrib>,
}

struct Context {
    profile: Profile,
    picture_width: u32,
    picture_height: u32,
    current_render_target: Option<SurfaceId>,
    codec: CodecState,
}

struct Buffer {
    kind: BufferType,
    store: StoreRef,
    mapped: bool,
}

/// Type and size of a buffer, as returned by [`Driver::buffer_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub kind: BufferType,
    pub element_size: usize,
    pub num_elements: usize,
}

/// Owner of every object created by a client.
pub struct Driver {
    configs: SlotHeap<ConfigId, Config>,
    contexts: SlotHeap<ContextId, Context>,
    surfaces: SlotHeap<SurfaceId, Surface>,
    buffers: SlotHeap<BufferId, Buffer>,
}

impl Driver {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            configs: SlotHeap::new(limits.max_objects),
            contexts: SlotHeap::new(limits.max_objects),
            surfaces: SlotHeap::new(limits.max_objects),
            buffers: SlotHeap::new(limits.max_objects),
        }
    }

    /// Destroys every object that is still alive, logging each one.
    pub fn terminate(mut self) {
        fn drain<I: ObjectId, T>(heap: &mut SlotHeap<I, T>) {
            if heap.is_empty() {
                return;
            }
            log::debug!("destroying {} leftover {} objects", heap.len(), I::NAME);
            for id in heap.ids() {
                log::info!("{} {:08x} still allocated, destroying", I::NAME, id.raw());
                heap.free(id);
            }
        }

        drain(&mut self.buffers);
        drain(&mut self.surfaces);
        drain(&mut self.contexts);
        drain(&mut self.configs);
    }

    // Configs

    pub fn query_config_profiles(&self) -> &'static [Profile] {
        &Profile::ALL
    }

    pub fn query_config_entrypoints(&self, profile: Profile) -> &'static [Entrypoint] {
        profile.entrypoints()
    }

    /// Fills in the values the driver supports for each attribute in `attribs`.
    pub fn get_config_attributes(
        &self,
        profile: Profile,
        entrypoint: Entrypoint,
        attribs: &mut [ConfigAttrib],
    ) -> Result<()> {
        profile.check_entrypoint(entrypoint)?;
        for attrib in attribs {
            attrib.value = match attrib.kind {
                ConfigAttribType::RtFormat => RtFormat::YUV420.0,
                _ => ATTRIB_NOT_SUPPORTED,
            };
        }
        Ok(())
    }

    /// Creates a config. `attribs` override the defaults (currently `RtFormat = YUV420`).
    pub fn create_config(
        &mut self,
        profile: Profile,
        entrypoint: Entrypoint,
        attribs: &[ConfigAttrib],
    ) -> Result<ConfigId> {
        profile.check_entrypoint(entrypoint)?;

        let mut list = vec![ConfigAttrib::new(
            ConfigAttribType::RtFormat,
            RtFormat::YUV420.0,
        )];
        for attrib in attribs {
            match list.iter().position(|a| a.kind == attrib.kind) {
                Some(i) => list[i].value = attrib.value,
                None if list.len() >= MAX_CONFIG_ATTRIBUTES => {
                    return Err(Error::from((
                        ErrorKind::CapacityExceeded,
                        format!("configs hold at most {MAX_CONFIG_ATTRIBUTES} attributes"),
                    )));
                }
                None => list.push(*attrib),
            }
        }

        self.configs.allocate(Config {
            profile,
            entrypoint,
            attribs: list,
        })
    }

    pub fn destroy_config(&mut self, config: ConfigId) -> Result<()> {
        self.configs
            .free(config)
            .map(drop)
            .ok_or_else(|| Error::invalid_handle(ConfigId::NAME, config.raw()))
    }

    pub fn query_config_attributes(
        &self,
        config: ConfigId,
    ) -> Result<(Profile, Entrypoint, &[ConfigAttrib])> {
        let config = self.configs.get(config)?;
        Ok((config.profile, config.entrypoint, &config.attribs))
    }

    // Surfaces

    /// Creates `count` surfaces. Either all of them are created or none.
    pub fn create_surfaces(
        &mut self,
        width: u32,
        height: u32,
        format: RtFormat,
        count: usize,
    ) -> Result<Vec<SurfaceId>> {
        if format != RtFormat::YUV420 {
            return Err(Error::from((
                ErrorKind::Unsupported,
                format!("render-target format {:#x} is not supported", format.0),
            )));
        }

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            match self.surfaces.allocate(Surface::new(width, height)) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids.into_iter().rev() {
                        self.surfaces.free(id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    /// Destroys surfaces. Nothing is destroyed if any handle is invalid or listed twice.
    pub fn destroy_surfaces(&mut self, surfaces: &[SurfaceId]) -> Result<()> {
        for (i, &id) in surfaces.iter().enumerate() {
            self.surfaces.get(id)?;
            if surfaces[..i].contains(&id) {
                return Err(Error::from((
                    ErrorKind::InvalidHandle,
                    format!("surface {:08x} is listed twice", id.raw()),
                )));
            }
        }
        for &id in surfaces {
            self.surfaces.free(id);
        }
        Ok(())
    }

    pub fn query_surface_status(&self, surface: SurfaceId) -> Result<SurfaceStatus> {
        Ok(self.surfaces.get(surface)?.status)
    }

    /// Waits until rendering to `surface` has finished.
    ///
    /// Decoding runs to completion inside [`Driver::end_picture`], so there is never anything to
    /// wait for.
    pub fn sync_surface(&self, surface: SurfaceId) -> Result<()> {
        self.surfaces.get(surface).map(drop)
    }

    /// Returns the picture last decoded into `surface`.
    pub fn surface_frame(&self, surface: SurfaceId) -> Result<Frame<'_>> {
        self.surfaces.get(surface)?.frame().ok_or_else(|| {
            Error::from((
                ErrorKind::InvalidState,
                format!("surface {:08x} holds no decoded picture", surface.raw()),
            ))
        })
    }

    /// Hands the picture in `surface` to a presentation backend.
    pub fn put_surface(&self, surface: SurfaceId, target: &mut impl Present) -> Result<()> {
        target.present(self.surface_frame(surface)?);
        Ok(())
    }

    // Contexts

    /// Creates a codec context for `config`.
    ///
    /// Every surface in `render_targets` must exist. The context encodes if the config's
    /// entrypoint is [`Entrypoint::EncSlice`] and decodes otherwise.
    pub fn create_context(
        &mut self,
        config: ConfigId,
        picture_width: u32,
        picture_height: u32,
        flags: u32,
        render_targets: &[SurfaceId],
    ) -> Result<ContextId> {
        let config = self.configs.get(config)?;
        for &target in render_targets {
            self.surfaces.get(target)?;
        }

        let codec = match config.entrypoint {
            Entrypoint::EncSlice => CodecState::encode(),
            Entrypoint::Vld | Entrypoint::MoComp => CodecState::decode(),
        };
        log::trace!(
            "creating {:?} context ({picture_width}x{picture_height}, flags {flags:#x}, {} render targets)",
            config.profile,
            render_targets.len(),
        );
        let profile = config.profile;
        self.contexts.allocate(Context {
            profile,
            picture_width,
            picture_height,
            current_render_target: None,
            codec,
        })
    }

    /// Destroys a context and releases every buffer it still references.
    pub fn destroy_context(&mut self, context: ContextId) -> Result<()> {
        let ctx = self
            .contexts
            .free(context)
            .ok_or_else(|| Error::invalid_handle(ContextId::NAME, context.raw()))?;
        if let Some(target) = ctx.current_render_target {
            self.finish_rendering(target);
        }
        Ok(())
    }

    // Buffers

    /// Creates a buffer of `num_elements` elements of `element_size` bytes each.
    ///
    /// The contents are copied from `data` if given and zeroed otherwise.
    pub fn create_buffer(
        &mut self,
        context: ContextId,
        kind: BufferType,
        element_size: usize,
        num_elements: usize,
        data: Option<&[u8]>,
    ) -> Result<BufferId> {
        self.contexts.get(context)?;
        if !kind.is_supported() {
            return Err(Error::from((
                ErrorKind::Unsupported,
                format!("{kind:?} buffers are not supported"),
            )));
        }

        let store = BufferStore::create(element_size, num_elements, data)?;
        self.buffers.allocate(Buffer {
            kind,
            store,
            mapped: false,
        })
    }

    /// Lowers (or restores) the number of valid elements of a buffer.
    pub fn buffer_set_num_elements(&mut self, buffer: BufferId, num_elements: usize) -> Result<()> {
        let store = exclusive_store(self.buffers.get_mut(buffer)?)?;
        let fits = num_elements
            .checked_mul(store.element_size())
            .map_or(false, |len| len <= store.data().len());
        if !fits {
            return Err(Error::from((
                ErrorKind::InvalidParameter,
                format!(
                    "buffer of {} bytes cannot hold {num_elements} elements of {} bytes",
                    store.data().len(),
                    store.element_size()
                ),
            )));
        }
        store.set_num_elements(num_elements);
        Ok(())
    }

    /// Gives the client write access to a buffer's bytes.
    pub fn map_buffer(&mut self, buffer: BufferId) -> Result<&mut [u8]> {
        let buffer = self.buffers.get_mut(buffer)?;
        buffer.mapped = true;
        Ok(exclusive_store(buffer)?.data_mut())
    }

    pub fn unmap_buffer(&mut self, buffer: BufferId) -> Result<()> {
        let buf = self.buffers.get_mut(buffer)?;
        if !mem::replace(&mut buf.mapped, false) {
            return Err(Error::from((
                ErrorKind::InvalidState,
                format!("buffer {:08x} is not mapped", buffer.raw()),
            )));
        }
        Ok(())
    }

    pub fn buffer_info(&self, buffer: BufferId) -> Result<BufferInfo> {
        let buffer = self.buffers.get(buffer)?;
        Ok(BufferInfo {
            kind: buffer.kind,
            element_size: buffer.store.element_size(),
            num_elements: buffer.store.num_elements(),
        })
    }

    pub fn destroy_buffer(&mut self, buffer: BufferId) -> Result<()> {
        self.buffers
            .free(buffer)
            .map(drop)
            .ok_or_else(|| Error::invalid_handle(BufferId::NAME, buffer.raw()))
    }

    // Pictures

    /// Opens a picture on `context` that renders into `surface`.
    ///
    /// Slice buffers submitted for the previous picture are released.
    pub fn begin_picture(&mut self, context: ContextId, surface: SurfaceId) -> Result<()> {
        let ctx = self.contexts.get_mut(context)?;
        if let Some(open) = ctx.current_render_target {
            return Err(Error::from((
                ErrorKind::InvalidState,
                format!(
                    "context {:08x} already has a picture open on surface {:08x}",
                    context.raw(),
                    open.raw()
                ),
            )));
        }
        let target = self.surfaces.get_mut(surface)?;

        target.status = SurfaceStatus::Rendering;
        ctx.current_render_target = Some(surface);
        ctx.codec.reset_slices();
        Ok(())
    }

    /// Submits buffers for the open picture, in order.
    ///
    /// Each accepted buffer is destroyed; its data now belongs to the context. Processing stops
    /// at the first buffer that cannot be attached, leaving it and all following buffers alive.
    pub fn render_picture(&mut self, context: ContextId, buffers: &[BufferId]) -> Result<()> {
        let ctx = self.contexts.get_mut(context)?;
        if ctx.current_render_target.is_none() {
            return Err(Error::from((
                ErrorKind::InvalidState,
                format!("context {:08x} has no open picture", context.raw()),
            )));
        }

        for &id in buffers {
            let buffer = self.buffers.get(id)?;
            ctx.codec.attach(buffer.kind, &buffer.store)?;
            self.buffers.free(id);
        }
        Ok(())
    }

    /// Closes the open picture and decodes it into its render target.
    ///
    /// Slice data that ends early is not an error: the picture is kept, and the returned summary
    /// reports the shortfall.
    pub fn end_picture(&mut self, context: ContextId) -> Result<DecodeSummary> {
        let ctx = self.contexts.get_mut(context)?;
        let target = ctx.current_render_target.take().ok_or_else(|| {
            Error::from((
                ErrorKind::InvalidState,
                format!("context {:08x} has no open picture", context.raw()),
            ))
        })?;
        if let Some(surface) = self.surfaces.lookup_mut(target) {
            surface.status = SurfaceStatus::Ready;
        }

        let state = match &ctx.codec {
            CodecState::Decode(state) => state,
            CodecState::Encode(state) => {
                return Err(Error::from((
                    ErrorKind::Unsupported,
                    format!(
                        "encoding is not supported ({} buffers attached)",
                        state.num_attached()
                    ),
                )));
            }
        };
        if ctx.profile != Profile::JpegBaseline {
            return Err(Error::from((
                ErrorKind::Unsupported,
                format!("decoding {:?} is not supported", ctx.profile),
            )));
        }

        let (image, summary) = decode::decode_picture(state)?;
        if (image.width(), image.height()) != (ctx.picture_width, ctx.picture_height) {
            log::debug!(
                "decoded {}x{} picture on a {}x{} context",
                image.width(),
                image.height(),
                ctx.picture_width,
                ctx.picture_height,
            );
        }

        let surface = self.surfaces.get_mut(target)?;
        if (image.width(), image.height()) != (surface.width, surface.height) {
            log::warn!(
                "{}x{} picture decoded into {}x{} surface",
                image.width(),
                image.height(),
                surface.width,
                surface.height,
            );
        }
        surface.image = Some(image);
        Ok(summary)
    }

    /// Decodes a parsed JPEG file into `surface`: opens a picture, submits all of `pics`' buffers
    /// and ends the picture.
    pub fn decode_jpeg(
        &mut self,
        context: ContextId,
        surface: SurfaceId,
        pics: &PictureBuffers,
    ) -> Result<DecodeSummary> {
        self.begin_picture(context, surface)?;

        // All slices share one slice parameter buffer, one element per scan.
        let parts: [(BufferType, usize, &[u8]); 5] = [
            (
                BufferType::PictureParameter,
                1,
                bytemuck::bytes_of(&pics.picture),
            ),
            (BufferType::IqMatrix, 1, bytemuck::bytes_of(&pics.iq_matrix)),
            (
                BufferType::HuffmanTable,
                1,
                bytemuck::bytes_of(&pics.huffman_table),
            ),
            (
                BufferType::SliceParameter,
                pics.slices.len(),
                bytemuck::cast_slice(&pics.slices),
            ),
            (BufferType::SliceData, 1, pics.slice_data.as_slice()),
        ];
        let mut ids = Vec::with_capacity(parts.len());
        if let Err(e) = self.submit(context, &parts, &mut ids) {
            // Buffers attached before the failure are already gone.
            for id in ids {
                self.buffers.free(id);
            }
            if let Some(ctx) = self.contexts.lookup_mut(context) {
                ctx.current_render_target = None;
            }
            self.finish_rendering(surface);
            return Err(e);
        }

        self.end_picture(context)
    }

    fn submit(
        &mut self,
        context: ContextId,
        parts: &[(BufferType, usize, &[u8])],
        ids: &mut Vec<BufferId>,
    ) -> Result<()> {
        for &(kind, num_elements, bytes) in parts {
            let element_size = bytes.len() / num_elements.max(1);
            ids.push(self.create_buffer(context, kind, element_size, num_elements, Some(bytes))?);
        }
        self.render_picture(context, ids)
    }

    fn finish_rendering(&mut self, surface: SurfaceId) {
        if let Some(surface) = self.surfaces.lookup_mut(surface) {
            surface.status = SurfaceStatus::Ready;
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

/// The store of a buffer that has not been submitted yet, which nothing else references.
fn exclusive_store(buffer: &mut Buffer) -> Result<&mut BufferStore> {
    Rc::get_mut(&mut buffer.store).ok_or_else(|| {
        Error::from((
            ErrorKind::InvalidState,
            "buffer data is shared and cannot be modified",
        ))
    })
}
