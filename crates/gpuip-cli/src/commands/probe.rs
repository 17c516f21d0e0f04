//! Backend probe command.

use anyhow::Result;
use gpuip::{ImageProcessor, describe_environments, detect_environments};
use tracing::trace;

/// Prints the environment table; with `verbose`, also the device each
/// available environment would open.
pub fn run(verbose: bool) -> Result<()> {
    trace!("probe::run");
    print!("{}", describe_environments());

    if verbose {
        for info in detect_environments().into_iter().filter(|i| i.available) {
            match ImageProcessor::new(info.environment) {
                Ok(ip) => println!("    {}: {}", info.environment, ip.device_name()),
                Err(e) => println!("    {}: {e}", info.environment),
            }
        }
    }
    Ok(())
}
