use std::io::Write;

use flexi_logger::{DeferredNow, Logger};
use log::Record;

use crate::Error;

/// `LEVEL message`, on stderr so command output stays clean on stdout.
fn cli_format(w: &mut dyn Write, _now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    write!(w, "{:<5} {}", record.level(), record.args())
}

pub fn init() -> Result<(), Error> {
    Logger::try_with_env_or_str("info")?
        .format(cli_format)
        .log_to_stderr()
        .start()?;

    Ok(())
}
