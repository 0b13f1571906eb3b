use std::{fs, process};

use failure::{Error, ResultExt, bail};
use minifb::{Key, Window, WindowOptions};
use structopt::StructOpt;

use log::info;

use advanboi::{
    SCREEN_WIDTH, SCREEN_HEIGHT, Disruption, Emulator,
    cartridge::Cartridge,
};
use crate::{
    args::Args,
    env::WindowDisplay,
    timer::LoopTimer,
};


mod args;
mod env;
mod logger;
mod timer;


/// The size of a correct BIOS image.
const BIOS_SIZE: usize = 16 * 1024;


fn main() {
    // We just catch potential errors here and pretty print them. A non-zero
    // exit code tells scripts that something went wrong.
    if let Err(e) = run() {
        eprintln!("ERROR: {}", e);

        for cause in e.iter_causes() {
            eprintln!("  ... caused by: {}", cause);
        }

        process::exit(1);
    }
}

/// The actual main function.
fn run() -> Result<(), Error> {
    // Parse CLI arguments
    let args = Args::from_args();

    // Initialize global logger.
    logger::init();
    log::set_max_level(args.log_level);

    // Load the BIOS. Execution can start in the cartridge instead, but the
    // boot ROM has to be mapped either way.
    let bios = fs::read(&args.bios)
        .context(format!("failed to load BIOS from '{}'", args.bios.display()))?;
    if bios.len() != BIOS_SIZE {
        bail!(
            "BIOS file '{}' is {} bytes, expected exactly {}",
            args.bios.display(),
            bios.len(),
            BIOS_SIZE,
        );
    }

    // Load ROM and create the emulator.
    let rom = fs::read(&args.rom)
        .context(format!("failed to load ROM from '{}'", args.rom.display()))?;
    let cartridge = Cartridge::from_bytes(&rom)?;
    info!("Loaded: {:#?}", cartridge);

    let mut emulator = Emulator::new(cartridge, &bios, args.skip_bios);

    let mut window = open_window(&args).context("failed to open window")?;
    info!("Opened window");

    let mut display = WindowDisplay::new();
    let mut timer = LoopTimer::new(args.fps);

    while window.is_open() && !window.is_key_down(Key::Escape) {
        // Run the emulator for one frame.
        match emulator.execute_frame(&mut display) {
            Ok(_) => {}
            Err(Disruption::Terminated) => {
                // The emulator ran into something it cannot execute. There
                // is no way to resume from that.
                bail!("emulator was terminated");
            }
        }

        window.update_with_buffer(display.buffer())
            .context("failed to update window contents")?;

        // Pace the host loop to the GBA frame rate.
        timer.wait_for_frame();
    }

    Ok(())
}

/// Opens a `minifb` window configured by `args`.
fn open_window(args: &Args) -> Result<Window, Error> {
    const TITLE: &str = "Advanboi";

    let options = WindowOptions {
        borderless: false,
        title: true,
        resize: false,
        scale: args.scale,
    };

    Window::new(TITLE, SCREEN_WIDTH, SCREEN_HEIGHT, options)
        .map_err(|e| e.into())
}
