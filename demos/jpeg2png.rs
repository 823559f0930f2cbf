use std::{env, fs, fs::File, io::BufWriter, path::PathBuf, process};

use anyhow::{bail, Context};
use vajpeg::{Driver, Entrypoint, Frame, PictureBuffers, Present, Profile, RtFormat};

/// Writes presented frames to a PNG file.
struct PngWriter {
    path: PathBuf,
    result: anyhow::Result<()>,
}

impl PngWriter {
    fn write(&self, frame: Frame<'_>) -> anyhow::Result<()> {
        let file = File::create(&self.path)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width, frame.height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;

        let mut data = Vec::with_capacity(frame.width as usize * frame.height as usize * 3);
        for y in 0..frame.height {
            data.extend_from_slice(frame.row(y).context("frame row out of bounds")?);
        }
        writer.write_image_data(&data)?;
        Ok(())
    }
}

impl Present for PngWriter {
    fn present(&mut self, frame: Frame<'_>) {
        self.result = self.write(frame);
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    let (infile, outfile) = match &*env::args().skip(1).collect::<Vec<_>>() {
        [infile, outfile] => (infile.clone(), PathBuf::from(outfile)),
        _ => {
            eprintln!("usage: jpeg2png <infile.jpg> <outfile.png>");
            process::exit(1);
        }
    };

    let jpeg = fs::read(&infile).with_context(|| format!("failed to read {infile}"))?;
    let pics = PictureBuffers::from_jpeg(&jpeg)?;
    let (width, height) = (
        u32::from(pics.picture.picture_width),
        u32::from(pics.picture.picture_height),
    );

    let mut driver = Driver::new();
    let config = driver.create_config(Profile::JpegBaseline, Entrypoint::Vld, &[])?;
    let surface = driver.create_surfaces(width, height, RtFormat::YUV420, 1)?[0];
    let context = driver.create_context(config, width, height, 0, &[surface])?;

    let summary = driver.decode_jpeg(context, surface, &pics)?;
    if !summary.is_complete() {
        log::warn!(
            "{infile} is truncated: decoded {} of {} MCUs",
            summary.mcus_decoded,
            summary.mcus_declared
        );
    }

    let mut target = PngWriter {
        path: outfile,
        result: Ok(()),
    };
    driver.put_surface(surface, &mut target)?;
    if let Err(e) = target.result {
        bail!("failed to write {}: {e}", target.path.display());
    }

    driver.destroy_context(context)?;
    driver.destroy_surfaces(&[surface])?;
    driver.destroy_config(config)?;
    driver.terminate();
    Ok(())
}
