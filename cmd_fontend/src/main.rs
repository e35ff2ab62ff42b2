extern crate raster_stream;
extern crate image;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use image::Primitive;
use num_traits::Unsigned;
use raster_stream::pixel::GrayPixel;
use raster_stream::sink::{PngSink, PngSinkConfig};
use raster_stream::source::ImageBufferSource;
use raster_stream::transform::{invert, Crop};
use raster_stream::{
    BoxedConsumer, Completion, ImageFilter, IntoBoxed, RowImageProducer, TeeImageFilter,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Options {
    invert: bool,
    crop: Option<(usize, usize, usize, usize)>,
    tee: Option<PathBuf>,
    line_buffered: bool,
    sixteen_bit: bool,
}

trait ParseArgs: Sized {
    fn parse(self, s: String) -> anyhow::Result<Self>;
}

impl ParseArgs for Options {
    fn parse(mut self, s: String) -> anyhow::Result<Self> {
        let mut opt = s.splitn(2, '=');
        let command = opt.next().unwrap_or_default();
        match command {
            "--invert" => self.invert = true,

            "--line-buffered" => self.line_buffered = true,

            "--crop" => {
                let values: Vec<usize> = opt
                    .next()
                    .ok_or_else(|| anyhow!("Expected crop window as left,top,width,height"))?
                    .split(',')
                    .map(|x| x.parse().with_context(|| format!("Invalid crop value {x}")))
                    .collect::<anyhow::Result<_>>()?;
                let [left, top, width, height] = values[..] else {
                    bail!("Expected four crop values, got {}", values.len());
                };
                self.crop = Some((left, top, width, height));
            }

            "--tee" => {
                let path = opt.next().ok_or_else(|| anyhow!("Expected second output path"))?;
                self.tee = Some(PathBuf::from(path));
            }

            "--depth" => match opt.next() {
                Some("8") => self.sixteen_bit = false,
                Some("16") => self.sixteen_bit = true,
                other => bail!("Invalid depth {:?}, expected 8 or 16", other),
            },

            unknown => bail!("Unexpected option '{}'", unknown),
        }
        Ok(self)
    }
}

fn open_output(dest: &str) -> anyhow::Result<Box<dyn Write>> {
    if dest == "-" {
        return Ok(Box::new(io::stdout()));
    }
    let file = File::create(dest).with_context(|| format!("Unable to create '{}'", dest))?;
    Ok(Box::new(BufWriter::new(file)))
}

fn run<P>(
    source: ImageBufferSource<P>,
    dest: &str,
    options: &Options,
) -> anyhow::Result<Completion>
where
    P: Primitive + GrayPixel + Unsigned + Default + 'static,
{
    let config = PngSinkConfig::default().with_line_buffered(options.line_buffered);

    let primary = PngSink::<_, P>::with_config(open_output(dest)?, config.clone());
    let mut chain: BoxedConsumer<P> = match &options.tee {
        Some(path) => {
            let secondary = PngSink::<BufWriter<File>, P>::create(path, config)?;
            TeeImageFilter::new(primary, Some(secondary.boxed())).boxed()
        }
        None => primary.boxed(),
    };
    if options.invert {
        chain = ImageFilter::with_boxed(invert::<P>(), chain).boxed();
    }
    if let Some((left, top, width, height)) = options.crop {
        chain = ImageFilter::with_boxed(Crop::new(left, top, width, height), chain).boxed();
    }

    let mut producer = RowImageProducer::with_boxed(source, chain);
    Ok(producer.produce_all_rows()?)
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut args = std::env::args();
    args.next();

    let src_uri = args.next()
        .ok_or_else(|| anyhow!("Expected source image"))?;

    let dest_uri = args.next()
        .ok_or_else(|| anyhow!("Expected destination image (or '-' for stdout)"))?;

    let options = args.try_fold(Options::default(), |options, action| options.parse(action))?;

    info!(source = %src_uri, "loading image");

    let completion = if options.sixteen_bit {
        let source = ImageBufferSource::open_luma16(&src_uri)
            .with_context(|| format!("Unable to load image '{}'", src_uri))?;
        run(source, &dest_uri, &options)?
    } else {
        let source = ImageBufferSource::open_luma8(&src_uri)
            .with_context(|| format!("Unable to load image '{}'", src_uri))?;
        run(source, &dest_uri, &options)?
    };

    info!(?completion, "streaming finished");
    Ok(())
}
