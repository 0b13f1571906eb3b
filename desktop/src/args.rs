use std::path::PathBuf;

use log::LevelFilter;
use minifb::Scale;
use structopt::StructOpt;


#[derive(Debug, StructOpt)]
pub(crate) struct Args {
    /// Path to the cartridge ROM that should be loaded.
    #[structopt(parse(from_os_str))]
    pub(crate) rom: PathBuf,

    /// Path to the 16 KiB BIOS image.
    #[structopt(long, default_value = "bios.bin", parse(from_os_str))]
    pub(crate) bios: PathBuf,

    /// Start executing at the cartridge entry point instead of running
    /// through the BIOS boot code.
    #[structopt(long)]
    pub(crate) skip_bios: bool,

    #[structopt(
        long,
        default_value = "2",
        parse(try_from_str = parse_scale),
        help = "Set the scale factor for the window: 1, 2, 4, 8, 16, 32 or 'fit' \
                (automatically chooses the largest scale factor that still fits on \
                the screen)."
    )]
    pub(crate) scale: Scale,

    /// Target frame rate. The hardware runs at ~59.73 frames per second.
    #[structopt(long, default_value = "59.7275")]
    pub(crate) fps: f64,

    /// Log filter: off, error, warn, info, debug or trace.
    #[structopt(long, default_value = "info")]
    pub(crate) log_level: LevelFilter,
}

fn parse_scale(src: &str) -> Result<Scale, &'static str> {
    match src {
        "1" => Ok(Scale::X1),
        "2" => Ok(Scale::X2),
        "4" => Ok(Scale::X4),
        "8" => Ok(Scale::X8),
        "16" => Ok(Scale::X16),
        "32" => Ok(Scale::X32),
        "fit" => Ok(Scale::FitScreen),
        _ => Err("only '1', '2', '4', '8', '16', '32' or 'fit' are allowed"),
    }
}
