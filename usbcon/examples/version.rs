//! Query the firmware version of the attached console

use usbcon::{DeviceFilter, Session};

fn main() -> usbcon::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // e.g. "14be", "14be:0009" or "name=Control"
    let mut session = match std::env::var("USBCON_FILTER") {
        Ok(filter) => {
            let filter: DeviceFilter = filter.parse()?;
            Session::with_filter(&filter)?
        }
        Err(_) => Session::new()?,
    };

    println!("Using {}", session.device());

    session.open()?;
    println!("✓ Opened");

    // Wake the console and stop it echoing our input
    session.invoke("")?;
    session.invoke("ECHO OFF")?;
    session.clear_read_buffer()?;

    let version = session.invoke("VER -V")?;
    println!("✓ Version:\n{}", version.trim());

    session.close();
    println!("✓ Closed");

    session.exit();
    Ok(())
}
