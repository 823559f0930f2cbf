// Decoded samples are compared with a tolerance: the encoder's forward DCT and our inverse DCT
// round independently.

use std::rc::Rc;

use bytemuck::Zeroable;
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};

use crate::{
    params::{
        HuffmanTableBuffer, IqMatrixBuffer, PictureComponent, PictureParameterBuffer,
        SliceComponent, SliceParameterBuffer,
    },
    session::CodecState,
    BufferId, BufferType, ConfigAttrib, ConfigAttribType, ContextId, Driver, Entrypoint,
    ErrorKind, Frame, Limits, PictureBuffers, Present, Profile, RtFormat, SurfaceId,
    SurfaceStatus, ATTRIB_NOT_SUPPORTED, MAX_PROFILES,
};

const ABS_TOLERANCE: u8 = 3;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Encodes `pixels` at quality 100, which makes every quantization table entry 1.
pub(crate) fn encode_jpeg(
    pixels: &[u8],
    width: u16,
    height: u16,
    color: ColorType,
    configure: impl FnOnce(&mut Encoder<&mut Vec<u8>>),
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut encoder = Encoder::new(&mut out, 100);
    configure(&mut encoder);
    encoder.encode(pixels, width, height, color).unwrap();
    out
}

fn open(width: u32, height: u32) -> (Driver, ContextId, SurfaceId) {
    init_logger();
    let mut driver = Driver::new();
    let config = driver
        .create_config(Profile::JpegBaseline, Entrypoint::Vld, &[])
        .unwrap();
    let surface = driver
        .create_surfaces(width, height, RtFormat::YUV420, 1)
        .unwrap()[0];
    let context = driver
        .create_context(config, width, height, 0, &[surface])
        .unwrap();
    (driver, context, surface)
}

fn create<T: bytemuck::Pod>(
    driver: &mut Driver,
    context: ContextId,
    kind: BufferType,
    value: &T,
) -> BufferId {
    let bytes = bytemuck::bytes_of(value);
    driver
        .create_buffer(context, kind, bytes.len(), 1, Some(bytes))
        .unwrap()
}

fn assert_flat(frame: Frame<'_>, expected: u8) {
    for y in 0..frame.height {
        let row = frame.row(y).unwrap();
        for (i, &v) in row.iter().enumerate() {
            assert!(
                v.abs_diff(expected) <= ABS_TOLERANCE,
                "sample {i} of row {y} is {v}, expected approx {expected}"
            );
        }
    }
}

/// A 4:2:0 picture of `mcus` 16x16 MCUs in a row, with Huffman tables that contain a single
/// zero-length code each (DC difference 0, end of block). Every block decodes to mid-grey.
fn single_symbol_picture(mcus: u16) -> PictureBuffers {
    let mut picture = PictureParameterBuffer::zeroed();
    picture.picture_width = 16 * mcus;
    picture.picture_height = 16;
    picture.num_components = 3;
    for (i, c) in picture.components[..3].iter_mut().enumerate() {
        let factor = if i == 0 { 2 } else { 1 };
        *c = PictureComponent {
            component_id: i as u8 + 1,
            h_sampling_factor: factor,
            v_sampling_factor: factor,
            quantiser_table_selector: 0,
        };
    }

    let mut iq_matrix = IqMatrixBuffer::zeroed();
    iq_matrix.load_quantiser_table[0] = 1;
    iq_matrix.quantiser_table[0] = [1; 64];

    let mut huffman_table = HuffmanTableBuffer::zeroed();
    huffman_table.load_huffman_table[0] = 1;
    let table = &mut huffman_table.huffman_table[0];
    table.num_dc_codes[0] = 1;
    table.dc_values[0] = 0x00;
    table.num_ac_codes[0] = 1;
    table.ac_values[0] = 0x00;

    let mut slice = SliceParameterBuffer::zeroed();
    slice.num_components = 3;
    for (i, c) in slice.components[..3].iter_mut().enumerate() {
        *c = SliceComponent {
            component_selector: i as u8 + 1,
            ..SliceComponent::default()
        };
    }
    slice.num_mcus = mcus.into();
    slice.slice_data_size = 4;

    PictureBuffers {
        picture,
        iq_matrix,
        huffman_table,
        slices: vec![slice],
        slice_data: vec![0; 4],
    }
}

#[derive(Default)]
struct Collect {
    rows: Vec<Vec<u8>>,
}

impl Present for Collect {
    fn present(&mut self, frame: Frame<'_>) {
        self.rows = (0..frame.height)
            .filter_map(|y| frame.row(y))
            .map(<[u8]>::to_vec)
            .collect();
    }
}

#[test]
fn capabilities() {
    let mut driver = Driver::new();
    assert_eq!(driver.query_config_profiles().len(), MAX_PROFILES);
    assert_eq!(
        driver.query_config_entrypoints(Profile::JpegBaseline),
        &[Entrypoint::Vld]
    );

    let mut attribs = [
        ConfigAttrib::new(ConfigAttribType::RtFormat, 0),
        ConfigAttrib::new(ConfigAttribType::RateControl, 0),
    ];
    driver
        .get_config_attributes(Profile::JpegBaseline, Entrypoint::Vld, &mut attribs)
        .unwrap();
    assert_eq!(attribs[0].value, RtFormat::YUV420.0);
    assert_eq!(attribs[1].value, ATTRIB_NOT_SUPPORTED);

    let err = driver
        .create_config(Profile::JpegBaseline, Entrypoint::EncSlice, &[])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);

    let config = driver
        .create_config(
            Profile::JpegBaseline,
            Entrypoint::Vld,
            &[
                ConfigAttrib::new(ConfigAttribType::RtFormat, RtFormat::YUV444.0),
                ConfigAttrib::new(ConfigAttribType::SpatialClipping, 3),
                ConfigAttrib::new(ConfigAttribType::SpatialClipping, 7),
            ],
        )
        .unwrap();
    let (profile, entrypoint, attribs) = driver.query_config_attributes(config).unwrap();
    assert_eq!((profile, entrypoint), (Profile::JpegBaseline, Entrypoint::Vld));
    assert_eq!(
        attribs,
        &[
            ConfigAttrib::new(ConfigAttribType::RtFormat, RtFormat::YUV444.0),
            ConfigAttrib::new(ConfigAttribType::SpatialClipping, 7),
        ]
    );

    driver.destroy_config(config).unwrap();
    assert_eq!(
        driver.destroy_config(config).unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
}

#[test]
fn handles_are_typed() {
    let (mut driver, context, surface) = open(16, 16);
    let as_surface = SurfaceId::from_raw(context.raw());
    assert_eq!(
        driver.query_surface_status(as_surface).unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
    let as_context = ContextId::from_raw(surface.raw());
    assert_eq!(
        driver.begin_picture(as_context, surface).unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
    assert_eq!(
        driver
            .destroy_buffer(BufferId::from_raw(0xdead_beef))
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidHandle
    );
}

#[test]
fn surfaces() {
    init_logger();
    let mut driver = Driver::with_limits(Limits { max_objects: 2 });
    assert_eq!(
        driver
            .create_surfaces(16, 16, RtFormat::YUV422, 1)
            .unwrap_err()
            .kind(),
        ErrorKind::Unsupported
    );

    // Creation is all-or-nothing.
    assert_eq!(
        driver
            .create_surfaces(16, 16, RtFormat::YUV420, 3)
            .unwrap_err()
            .kind(),
        ErrorKind::AllocationFailed
    );
    assert!(driver.surfaces.is_empty());

    // The rolled-back slots are handed out again in their original order.
    let ids = driver.create_surfaces(16, 16, RtFormat::YUV420, 2).unwrap();
    assert!(ids[0].raw() < ids[1].raw());
    assert_eq!(
        driver.query_surface_status(ids[0]).unwrap(),
        SurfaceStatus::Ready
    );
    driver.sync_surface(ids[1]).unwrap();
    assert_eq!(
        driver.surface_frame(ids[0]).unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    let never_allocated = SurfaceId::from_raw(0x0400_00ff);
    assert_eq!(
        driver
            .destroy_surfaces(&[ids[0], never_allocated])
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidHandle
    );
    assert_eq!(driver.surfaces.len(), 2);
    let err = driver.destroy_surfaces(&[ids[1], ids[1]]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    assert_eq!(driver.surfaces.len(), 2);
    driver.destroy_surfaces(&ids).unwrap();
    assert!(driver.surfaces.is_empty());
}

#[test]
fn buffers() {
    let (mut driver, context, _) = open(16, 16);

    let buffer = driver
        .create_buffer(context, BufferType::SliceData, 4, 3, Some(&[1; 12]))
        .unwrap();
    let info = driver.buffer_info(buffer).unwrap();
    assert_eq!(info.kind, BufferType::SliceData);
    assert_eq!((info.element_size, info.num_elements), (4, 3));

    driver.map_buffer(buffer).unwrap()[0] = 42;
    driver.unmap_buffer(buffer).unwrap();
    assert_eq!(
        driver.unmap_buffer(buffer).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(driver.map_buffer(buffer).unwrap()[..2], [42, 1]);
    driver.unmap_buffer(buffer).unwrap();

    driver.buffer_set_num_elements(buffer, 1).unwrap();
    assert_eq!(driver.buffer_info(buffer).unwrap().num_elements, 1);
    driver.buffer_set_num_elements(buffer, 3).unwrap();
    assert_eq!(
        driver.buffer_set_num_elements(buffer, 4).unwrap_err().kind(),
        ErrorKind::InvalidParameter
    );

    let zeroed = driver
        .create_buffer(context, BufferType::IqMatrix, 8, 1, None)
        .unwrap();
    assert_eq!(driver.map_buffer(zeroed).unwrap(), &[0; 8]);

    assert_eq!(
        driver
            .create_buffer(context, BufferType::Probability, 1, 1, None)
            .unwrap_err()
            .kind(),
        ErrorKind::Unsupported
    );
    let stale = ContextId::from_raw(context.raw() + 1);
    assert_eq!(
        driver
            .create_buffer(stale, BufferType::SliceData, 1, 1, None)
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidHandle
    );

    driver.destroy_buffer(buffer).unwrap();
    assert_eq!(
        driver.buffer_info(buffer).unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
}

#[test]
fn freed_handles_are_reused() {
    let (mut driver, context, _) = open(16, 16);
    let a = driver
        .create_buffer(context, BufferType::SliceData, 1, 1, None)
        .unwrap();
    let b = driver
        .create_buffer(context, BufferType::SliceData, 1, 1, None)
        .unwrap();
    driver.destroy_buffer(a).unwrap();
    driver.destroy_buffer(b).unwrap();
    let c = driver
        .create_buffer(context, BufferType::SliceData, 1, 1, None)
        .unwrap();
    let d = driver
        .create_buffer(context, BufferType::SliceData, 1, 1, None)
        .unwrap();
    assert_eq!((c, d), (b, a));
}

#[test]
fn render_transfers_ownership() {
    let (mut driver, context, surface) = open(16, 16);
    let pics = single_symbol_picture(1);
    let buffer = create(
        &mut driver,
        context,
        BufferType::PictureParameter,
        &pics.picture,
    );

    driver.begin_picture(context, surface).unwrap();
    assert_eq!(
        driver.query_surface_status(surface).unwrap(),
        SurfaceStatus::Rendering
    );
    driver.render_picture(context, &[buffer]).unwrap();

    // The handle is gone, the data lives on in the context.
    assert_eq!(
        driver.destroy_buffer(buffer).unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
    let CodecState::Decode(state) = &driver.contexts.get(context).unwrap().codec else {
        panic!("decode context expected");
    };
    let store = state.pic_param.as_ref().unwrap();
    assert_eq!(Rc::strong_count(store), 1);
    assert_eq!(
        store.element::<PictureParameterBuffer>(0).unwrap().picture_width,
        16
    );
}

#[test]
fn picture_state_machine() {
    let (mut driver, context, surface) = open(16, 16);
    let buffer = driver
        .create_buffer(context, BufferType::SliceData, 1, 1, None)
        .unwrap();

    assert_eq!(
        driver.render_picture(context, &[buffer]).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(
        driver.end_picture(context).unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    driver.begin_picture(context, surface).unwrap();
    assert_eq!(
        driver.begin_picture(context, surface).unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    // Nothing but slice data was submitted.
    driver.render_picture(context, &[buffer]).unwrap();
    assert_eq!(
        driver.end_picture(context).unwrap_err().kind(),
        ErrorKind::MissingBuffer
    );
    assert_eq!(
        driver.query_surface_status(surface).unwrap(),
        SurfaceStatus::Ready
    );

    // The failed picture is closed; a new one can be started.
    driver.begin_picture(context, surface).unwrap();
}

#[test]
fn render_stops_at_first_rejected_buffer() {
    let (mut driver, context, surface) = open(16, 16);
    let pics = single_symbol_picture(1);
    let accepted = create(
        &mut driver,
        context,
        BufferType::PictureParameter,
        &pics.picture,
    );
    let rejected = driver
        .create_buffer(context, BufferType::EncSequenceParameter, 4, 1, None)
        .unwrap();
    let pending = create(&mut driver, context, BufferType::SliceParameter, &pics.slices[0]);

    driver.begin_picture(context, surface).unwrap();
    let err = driver
        .render_picture(context, &[accepted, rejected, pending])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);

    assert!(driver.buffer_info(accepted).is_err());
    assert!(driver.buffer_info(rejected).is_ok());
    assert!(driver.buffer_info(pending).is_ok());
}

#[test]
fn unsupported_codecs_fail_at_end_picture() {
    init_logger();
    let mut driver = Driver::new();
    let surface = driver
        .create_surfaces(16, 16, RtFormat::YUV420, 1)
        .unwrap()[0];

    let config = driver
        .create_config(Profile::H264Main, Entrypoint::EncSlice, &[])
        .unwrap();
    let encoder = driver.create_context(config, 16, 16, 0, &[surface]).unwrap();
    let seq = driver
        .create_buffer(encoder, BufferType::EncSequenceParameter, 4, 1, None)
        .unwrap();
    driver.begin_picture(encoder, surface).unwrap();
    driver.render_picture(encoder, &[seq]).unwrap();
    assert_eq!(
        driver.end_picture(encoder).unwrap_err().kind(),
        ErrorKind::Unsupported
    );

    let config = driver
        .create_config(Profile::Mpeg2Main, Entrypoint::Vld, &[])
        .unwrap();
    let decoder = driver.create_context(config, 16, 16, 0, &[surface]).unwrap();
    driver.begin_picture(decoder, surface).unwrap();
    assert_eq!(
        driver.end_picture(decoder).unwrap_err().kind(),
        ErrorKind::Unsupported
    );
}

#[test]
fn contexts_validate_render_targets() {
    let (mut driver, _, surface) = open(16, 16);
    let config = driver
        .create_config(Profile::JpegBaseline, Entrypoint::Vld, &[])
        .unwrap();
    driver.destroy_surfaces(&[surface]).unwrap();
    assert_eq!(
        driver
            .create_context(config, 16, 16, 0, &[surface])
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidHandle
    );
}

#[test]
fn destroying_context_releases_picture() {
    let (mut driver, context, surface) = open(16, 16);
    let pics = single_symbol_picture(1);
    let buffer = create(&mut driver, context, BufferType::IqMatrix, &pics.iq_matrix);
    driver.begin_picture(context, surface).unwrap();
    driver.render_picture(context, &[buffer]).unwrap();

    driver.destroy_context(context).unwrap();
    assert!(driver.contexts.is_empty());
    assert!(driver.buffers.is_empty());
    assert_eq!(
        driver.query_surface_status(surface).unwrap(),
        SurfaceStatus::Ready
    );
    assert_eq!(
        driver.destroy_context(context).unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
}

#[test]
fn single_symbol_tables() {
    let (mut driver, context, surface) = open(16, 16);
    let summary = driver
        .decode_jpeg(context, surface, &single_symbol_picture(1))
        .unwrap();
    assert!(summary.is_complete());
    assert_eq!((summary.slices, summary.mcus_decoded), (1, 1));

    let frame = driver.surface_frame(surface).unwrap();
    assert_eq!((frame.width, frame.height), (16, 16));
    assert_eq!(frame.data, &[128; 16 * 16 * 3][..]);
    assert!(driver.buffers.is_empty());
}

#[test]
fn slices_accumulate_across_render_calls() {
    let (mut driver, context, surface) = open(32, 16);
    let pics = single_symbol_picture(2);

    let mut first = pics.slices[0];
    first.num_mcus = 1;
    let mut second = first;
    second.slice_horizontal_position = 1;

    driver.begin_picture(context, surface).unwrap();
    let header = [
        create(&mut driver, context, BufferType::PictureParameter, &pics.picture),
        create(&mut driver, context, BufferType::IqMatrix, &pics.iq_matrix),
        create(&mut driver, context, BufferType::HuffmanTable, &pics.huffman_table),
    ];
    driver.render_picture(context, &header).unwrap();
    for slice in [first, second] {
        let params = create(&mut driver, context, BufferType::SliceParameter, &slice);
        let data = driver
            .create_buffer(context, BufferType::SliceData, 4, 1, Some(&pics.slice_data))
            .unwrap();
        driver.render_picture(context, &[params, data]).unwrap();
    }
    let summary = driver.end_picture(context).unwrap();
    assert_eq!(summary.slices, 2);
    assert_eq!(summary.mcus_decoded, 2);
    assert_flat(driver.surface_frame(surface).unwrap(), 128);

    // Slices do not carry over into the next picture.
    driver.begin_picture(context, surface).unwrap();
    assert_eq!(
        driver.end_picture(context).unwrap_err().kind(),
        ErrorKind::MissingBuffer
    );
}

#[test]
fn grey_luma() {
    let (mut driver, context, surface) = open(24, 16);
    let jpeg = encode_jpeg(&[140; 24 * 16], 24, 16, ColorType::Luma, |_| {});
    let pics = PictureBuffers::from_jpeg(&jpeg).unwrap();
    let summary = driver.decode_jpeg(context, surface, &pics).unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.mcus_decoded, 6);

    // A flat block of value v decodes to 128 + 2 * (v - 128).
    assert_flat(driver.surface_frame(surface).unwrap(), 152);
}

#[test]
fn grey_rgb_420() {
    let (mut driver, context, surface) = open(40, 24);
    let jpeg = encode_jpeg(&[140; 40 * 24 * 3], 40, 24, ColorType::Rgb, |enc| {
        enc.set_sampling_factor(SamplingFactor::R_4_2_0);
    });
    let pics = PictureBuffers::from_jpeg(&jpeg).unwrap();
    let summary = driver.decode_jpeg(context, surface, &pics).unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.mcus_decoded, 3 * 2);
    assert_flat(driver.surface_frame(surface).unwrap(), 152);
}

#[test]
fn grey_rgb_411_sequential_scans() {
    let (mut driver, context, surface) = open(40, 24);
    let jpeg = encode_jpeg(&[140; 40 * 24 * 3], 40, 24, ColorType::Rgb, |enc| {
        enc.set_sampling_factor(SamplingFactor::R_4_1_1);
        enc.set_restart_interval(2);
    });
    let pics = PictureBuffers::from_jpeg(&jpeg).unwrap();
    let summary = driver.decode_jpeg(context, surface, &pics).unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.slices, 3);
    assert_eq!(summary.mcus_decoded, 15 + 6 + 6);
    assert_flat(driver.surface_frame(surface).unwrap(), 152);
    assert!(driver.buffers.is_empty());
}

#[test]
fn restart_intervals() {
    let (mut driver, context, surface) = open(32, 32);
    let jpeg = encode_jpeg(&[140; 32 * 32 * 3], 32, 32, ColorType::Rgb, |enc| {
        enc.set_sampling_factor(SamplingFactor::R_4_2_0);
        enc.set_restart_interval(1);
    });
    let pics = PictureBuffers::from_jpeg(&jpeg).unwrap();
    assert_eq!(pics.slices[0].restart_interval, 1);

    let summary = driver.decode_jpeg(context, surface, &pics).unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.mcus_declared, 4);
    assert_eq!(summary.mcus_decoded, 4);
    assert_flat(driver.surface_frame(surface).unwrap(), 152);
}

#[test]
fn truncated_scan_keeps_partial_picture() {
    let (mut driver, context, surface) = open(64, 64);
    let mut rng = fastrand::Rng::with_seed(7);
    let pixels: Vec<u8> = (0..64 * 64 * 3).map(|_| rng.u8(..)).collect();
    let jpeg = encode_jpeg(&pixels, 64, 64, ColorType::Rgb, |enc| {
        enc.set_sampling_factor(SamplingFactor::R_4_2_0);
    });
    let mut pics = PictureBuffers::from_jpeg(&jpeg).unwrap();
    pics.slice_data.truncate(pics.slice_data.len() / 2);
    pics.slices[0].slice_data_size = pics.slice_data.len() as u32;

    let summary = driver.decode_jpeg(context, surface, &pics).unwrap();
    assert!(!summary.is_complete());
    assert_eq!(summary.truncated_slices, 1);
    assert_eq!(summary.mcus_declared, 16);
    assert!(summary.mcus_decoded < 16);

    let frame = driver.surface_frame(surface).unwrap();
    assert_eq!(frame.data.len(), 64 * 64 * 3);
    // Undecoded MCUs stay black.
    assert_eq!(frame.row(63).unwrap()[63 * 3..], [0, 0, 0]);
}

#[test]
fn put_surface() {
    let (mut driver, context, surface) = open(16, 16);
    let mut target = Collect::default();
    assert_eq!(
        driver.put_surface(surface, &mut target).unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    driver
        .decode_jpeg(context, surface, &single_symbol_picture(1))
        .unwrap();
    driver.put_surface(surface, &mut target).unwrap();
    assert_eq!(target.rows.len(), 16);
    assert!(target.rows.iter().all(|row| row == &[128; 48]));
}

#[test]
fn terminate_destroys_leftovers() {
    let (mut driver, context, surface) = open(16, 16);
    let pics = single_symbol_picture(1);
    let pending = driver
        .create_buffer(context, BufferType::SliceData, 1, 1, None)
        .unwrap();
    let attached = create(&mut driver, context, BufferType::IqMatrix, &pics.iq_matrix);
    let pending = Rc::downgrade(&driver.buffers.get(pending).unwrap().store);

    driver.begin_picture(context, surface).unwrap();
    driver.render_picture(context, &[attached]).unwrap();
    let CodecState::Decode(state) = &driver.contexts.get(context).unwrap().codec else {
        panic!("JPEG contexts decode");
    };
    let attached = Rc::downgrade(state.iq_matrix.as_ref().unwrap());

    driver.terminate();
    assert!(pending.upgrade().is_none());
    assert!(attached.upgrade().is_none());
}
