use log::{Level, Log, Metadata, Record};


/// Installs the terminal logger. The verbosity comes from `--log-level`,
/// which `run()` feeds into `log::set_max_level` right after this.
pub(crate) fn init() {
    log::set_logger(&TermLogger)
        .expect("called init(), but a logger is already set!");
}

/// One line per event, to the terminal.
///
/// The emulator core tags per-frame noise (V-blank, dropped byte stores to
/// video memory) as `trace`, so the default `info` filter stays readable
/// while a ROM is running; `--log-level trace` opens the firehose. Errors
/// and warnings go to stderr so they survive piping the frame-rate output
/// elsewhere.
struct TermLogger;

impl Log for TermLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Dependencies (minifb in particular) log too; only the emulator's
        // own crates are interesting here.
        let is_ours = record.module_path()
            .map(|path| path.starts_with("advanboi"))
            .unwrap_or(false);
        if !is_ours {
            return;
        }

        if record.level() <= Level::Warn {
            eprintln!("{:5}: {}", record.level(), record.args());
        } else {
            println!("{:5}: {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}
