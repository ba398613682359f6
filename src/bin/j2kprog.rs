//! j2kprog CLI - progressive JPEG 2000 decoding from the command line.
//!
//! Decodes resolutions one after another, the way a streaming viewer
//! refines an image, and writes the requested level.

use clap::{Parser, Subcommand, ValueEnum};
use j2kprog_rs::{DecoderOptions, ProgressiveDecoder};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

/// Progressive JPEG 2000 (Part 1) decoder
#[derive(Parser)]
#[command(name = "j2kprog")]
#[command(version)]
#[command(about = "Resolution-by-resolution JPEG 2000 decoder", long_about = None)]
#[command(after_help = "EXAMPLES:
    j2kprog info -i tile.j2k
    j2kprog decode -i tile.j2k -o tile.ppm -f ppm
    j2kprog decode -i tile.jp2 -o thumb.raw --resolution 1 --layers 2

Set RUST_LOG=j2kprog_rs=debug to trace header and packet parsing.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode resolutions 0..=N and write resolution N
    #[command(visible_alias = "d")]
    Decode {
        /// Input codestream (.j2k/.j2c) or JP2 file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path for decoded pixels
        #[arg(short, long)]
        output: PathBuf,

        /// Output format: raw (interleaved bytes) or ppm (PGM/PPM)
        #[arg(short, long, default_value = "raw", value_enum)]
        format: OutputFormat,

        /// Resolution to stop at (defaults to the full resolution)
        #[arg(short, long)]
        resolution: Option<usize>,

        /// Decode at most this many quality layers
        #[arg(short, long)]
        layers: Option<u16>,
    },

    /// Display codestream geometry and coding parameters
    #[command(visible_alias = "i")]
    Info {
        /// Input codestream or JP2 file
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Raw interleaved 8-bit samples
    Raw,
    /// Portable GrayMap / PixMap
    Ppm,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Decode {
            input,
            output,
            format,
            resolution,
            layers,
        } => decode_image(&input, &output, &format, resolution, layers),
        Commands::Info { input } => show_info(&input),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn decode_image(
    input: &Path,
    output: &Path,
    format: &OutputFormat,
    resolution: Option<usize>,
    layers: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let options = DecoderOptions {
        max_quality_layers: layers,
    };
    let mut decoder = ProgressiveDecoder::new(&data, options)?;

    let last = decoder.resolution_count() - 1;
    let target = resolution.unwrap_or(last);
    if target > last {
        return Err(format!("resolution {target} requested, codestream has 0..={last}").into());
    }

    for r in 0..=target {
        decoder.decode_resolution(r)?;
        info!(
            "resolution {r}: {}x{}",
            decoder.width(r),
            decoder.height(r)
        );
    }
    let pixels = decoder.cached_pixels().unwrap_or_default();
    let (width, height) = (decoder.width(target), decoder.height(target));
    let channels = decoder.num_channels();

    match format {
        OutputFormat::Raw => fs::write(output, pixels)?,
        OutputFormat::Ppm => write_ppm(output, pixels, width, height, channels)?,
    }

    println!(
        "✓ Decoded resolution {} ({}x{}, {} channel(s)) to {:?}",
        target, width, height, channels, output
    );
    if decoder.concealed_codeblocks() > 0 {
        println!(
            "  {} corrupted code-block(s) concealed",
            decoder.concealed_codeblocks()
        );
    }
    Ok(())
}

fn show_info(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let decoder = ProgressiveDecoder::new(&data, DecoderOptions::default())?;
    let header = decoder.header();

    println!("File: {:?}", input);
    println!("Size: {} bytes", data.len());
    println!();
    println!(
        "Format: {}",
        if data.starts_with(&[0xFF, 0x4F]) {
            "JPEG 2000 Codestream"
        } else {
            "JP2 Container (JPEG 2000)"
        }
    );
    println!(
        "  Image area:  {}x{} at ({}, {})",
        header.width - header.x_origin,
        header.height - header.y_origin,
        header.x_origin,
        header.y_origin
    );
    println!("  Channels:    {}", decoder.num_channels());
    for (i, c) in header.components.iter().enumerate() {
        println!("    [{i}] {} bits", c.depth);
    }
    println!("  Color:       {}", if header.uses_color_transform() { "RCT" } else { "none" });
    println!("  Layers:      {}", header.cod.number_of_layers);
    println!(
        "  Code-blocks: {}x{}, style {:#04x}",
        1u32 << header.cod.codeblock_width_exp,
        1u32 << header.cod.codeblock_height_exp,
        header.cod.codeblock_style.0
    );
    println!("  SOP / EPH:   {} / {}", header.cod.uses_sop(), header.cod.uses_eph());
    println!("  Resolutions: {}", decoder.resolution_count());
    for r in 0..decoder.resolution_count() {
        println!("    [{r}] {}x{}", decoder.width(r), decoder.height(r));
    }
    Ok(())
}

fn write_ppm(
    path: &Path,
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    use std::io::Write;
    let mut file = fs::File::create(path)?;

    match channels {
        1 => writeln!(file, "P5")?,
        3 => writeln!(file, "P6")?,
        n => return Err(format!("PPM output needs 1 or 3 channels, image has {n}").into()),
    }
    writeln!(file, "{} {}", width, height)?;
    writeln!(file, "255")?;
    file.write_all(pixels)?;

    Ok(())
}
