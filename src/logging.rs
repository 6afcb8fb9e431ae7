use anyhow::Result;
use tracing_subscriber::fmt;

/// Installs the fmt subscriber for `--verbose`. Events go to stderr so the
/// JSON summary on stdout stays parseable.
pub fn init(verbose: bool) -> Result<()> {
    if !verbose {
        return Ok(());
    }
    let _ = fmt()
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}
