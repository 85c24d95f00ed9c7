//! High-level console session

use std::time::Instant;

use tracing::{debug, info, trace, warn};

use usbcon_core::constants::DEFAULT_VENDOR_ID;
use usbcon_core::{codec, select, EndpointPair, Prompt, ResponseBuffer, SessionState};
use usbcon_transport::{Capabilities, DeviceHandle, LibUsbTransport, ReadOutcome, Transport};
use usbcon_types::{DeviceDescriptor, DeviceFilter};

use crate::config::SessionConfig;
use crate::error::{Error, OpenStep, Result};
use crate::lease::DeviceLease;

/// Command session with one USB console device
///
/// The device is selected when the session is created; it is opened by
/// [`open`](Self::open) and released by [`close`](Self::close). Commands are
/// exchanged with [`invoke`](Self::invoke) while open.
///
/// # Examples
///
/// ```no_run
/// use usbcon::Session;
///
/// fn main() -> usbcon::Result<()> {
///     let mut session = Session::new()?;
///
///     session.open()?;
///     session.invoke("ECHO OFF")?;
///     session.clear_read_buffer()?;
///
///     let version = session.invoke("VER -V")?;
///     println!("{}", version);
///
///     session.close();
///     Ok(())
/// }
/// ```
pub struct Session {
    transport: Box<dyn Transport>,
    filter: DeviceFilter,
    device: DeviceDescriptor,
    config: SessionConfig,
    open: Option<OpenDevice>,
    lease: DeviceLease,
}

/// Resources held while the session is open
///
/// Endpoints live and die with the handle.
struct OpenDevice {
    handle: Box<dyn DeviceHandle>,
    endpoints: EndpointPair,
    max_packet: usize,
    claimed: Option<u8>,
}

impl Session {
    /// Bind to the single attached device of the console vendor
    ///
    /// # Errors
    ///
    /// Fails if no such device or more than one is attached.
    pub fn new() -> Result<Self> {
        Self::with_vendor(DEFAULT_VENDOR_ID)
    }

    /// Bind to the single attached device with this vendor ID
    pub fn with_vendor(vendor_id: u16) -> Result<Self> {
        Self::with_filter(&DeviceFilter::vendor(vendor_id))
    }

    /// Bind to the single attached device with this vendor and product ID
    pub fn with_product(vendor_id: u16, product_id: u16) -> Result<Self> {
        Self::with_filter(&DeviceFilter::product(vendor_id, product_id))
    }

    /// Bind to the single attached device whose manufacturer or product
    /// string matches `pattern`
    pub fn with_name(pattern: &str) -> Result<Self> {
        Self::with_filter(&DeviceFilter::name(pattern)?)
    }

    /// Bind through libusb using any filter
    pub fn with_filter(filter: &DeviceFilter) -> Result<Self> {
        let transport = LibUsbTransport::new()?;
        Self::with_transport(Box::new(transport), filter, SessionConfig::default())
    }

    /// Bind through the given transport
    ///
    /// Runs device selection once. The chosen device is not opened.
    ///
    /// # Errors
    ///
    /// - Invalid `config`
    /// - Enumeration failure
    /// - No device, or more than one, matches `filter`
    /// - Another live session is bound to the same device
    pub fn with_transport(
        mut transport: Box<dyn Transport>,
        filter: &DeviceFilter,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;

        debug!("Selecting device matching {} via {}...", filter, transport.name());

        let candidates = transport.enumerate(filter.needs_strings())?;
        let device = select(candidates, filter)?;
        let lease = DeviceLease::acquire(device.key())?;

        info!("Selected {}", device);

        Ok(Self {
            transport,
            filter: filter.clone(),
            device,
            config,
            open: None,
            lease,
        })
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Selected device
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Active configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the device is currently open
    pub fn state(&self) -> SessionState {
        if self.open.is_some() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    /// Check if the session is open and the device handle still usable
    pub fn test_session(&self) -> bool {
        self.open.as_ref().is_some_and(|dev| dev.handle.is_open())
    }

    /// Open the device
    ///
    /// Selects the configuration, claims the interface and binds the bulk
    /// endpoints, as far as the handle's capabilities require. Does nothing
    /// if already open.
    ///
    /// A device that re-enumerated since selection (e.g. after the reset
    /// done by [`close`](Self::close)) is selected again with the original
    /// filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OpenFailed`] if any step fails. Whatever was
    /// acquired is released first, so `open` can simply be retried.
    /// Reselection fails like construction does.
    pub fn open(&mut self) -> Result<()> {
        if self.open.is_some() {
            debug!("Session already open");
            return Ok(());
        }

        info!("Opening {}...", self.device);

        let handle = match self.transport.open(&self.device) {
            Ok(handle) => handle,
            Err(usbcon_transport::Error::DeviceGone(_)) => {
                self.reselect()?;
                self.transport
                    .open(&self.device)
                    .map_err(|source| Error::OpenFailed {
                        step: OpenStep::Open,
                        source,
                    })?
            }
            Err(source) => {
                return Err(Error::OpenFailed {
                    step: OpenStep::Open,
                    source,
                });
            }
        };

        self.open = Some(OpenDevice {
            handle,
            endpoints: self.config.endpoints,
            max_packet: self.config.read_chunk_size,
            claimed: None,
        });

        if let Err(e) = self.configure() {
            warn!("Open failed: {}", e);
            self.close();
            return Err(e);
        }

        info!("Session open ({})", self.config.endpoints);
        Ok(())
    }

    /// Run device selection again and move the lease to the new address
    fn reselect(&mut self) -> Result<()> {
        debug!("{} is gone; selecting again with {}", self.device, self.filter);

        let candidates = self.transport.enumerate(self.filter.needs_strings())?;
        let device = select(candidates, &self.filter)?;

        if device.key() != self.device.key() {
            self.lease = DeviceLease::acquire(device.key())?;
        }

        info!("Reselected {} (was {})", device, self.device.key());
        self.device = device;
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        let dev = self.open.as_mut().ok_or(Error::NotOpen)?;
        let caps = dev.handle.capabilities();

        debug!("Handle capabilities: {:?}", caps);

        if caps.contains(Capabilities::CONFIGURE) {
            dev.handle
                .set_configuration(self.config.configuration)
                .map_err(|source| Error::OpenFailed {
                    step: OpenStep::Configure,
                    source,
                })?;
        }

        if caps.contains(Capabilities::CLAIM_INTERFACE) {
            dev.handle
                .claim_interface(self.config.interface)
                .map_err(|source| Error::OpenFailed {
                    step: OpenStep::Claim,
                    source,
                })?;
            dev.claimed = Some(self.config.interface);
        }

        let EndpointPair { writer, reader } = dev.endpoints;
        dev.max_packet = dev
            .handle
            .bind_endpoints(self.config.interface, writer, reader)
            .map_err(|source| Error::OpenFailed {
                step: OpenStep::Endpoints,
                source,
            })?;

        Ok(())
    }

    /// Close the device
    ///
    /// Releases the interface, resets the device and drops the handle
    /// together with its endpoints. Each step is best-effort; failures are
    /// logged. The transport stays usable, so the session can be reopened.
    pub fn close(&mut self) {
        let Some(mut dev) = self.open.take() else {
            return;
        };

        info!("Closing {}...", self.device);

        let mut gone = false;

        if let Some(interface) = dev.claimed.take() {
            if let Err(e) = dev.handle.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
                gone = e.is_fatal();
            }
        }

        // Nothing to reset once the device is gone
        if !gone
            && self.config.reset_on_close
            && dev.handle.capabilities().contains(Capabilities::RESET)
        {
            if let Err(e) = dev.handle.reset() {
                warn!("Failed to reset device: {}", e);
            }
        }

        drop(dev);
        debug!("Session closed");
    }

    /// Close the session and release the transport's process-wide resources
    pub fn exit(mut self) {
        self.close();
        self.transport.teardown();
        info!("Transport released");
    }

    /// Run a command and wait for the default prompt
    ///
    /// See [`invoke_until`](Self::invoke_until).
    pub fn invoke(&mut self, command: &str) -> Result<String> {
        let prompt = self.config.prompt.clone();
        self.invoke_until(command, &prompt)
    }

    /// Run a command and wait for a prompt given as a regular expression
    ///
    /// # Errors
    ///
    /// [`Error::NotOpen`] takes precedence over an invalid pattern.
    pub fn invoke_with_prompt(&mut self, command: &str, prompt: &str) -> Result<String> {
        if self.open.is_none() {
            return Err(Error::NotOpen);
        }

        let prompt = Prompt::new(prompt)?;
        self.invoke_until(command, &prompt)
    }

    /// Run a command and collect the response
    ///
    /// The command is sent followed by CR-LF. The response is read chunk by
    /// chunk until the accumulated text contains `prompt`, a read times out
    /// with nothing received, or the invoke deadline passes. A timeout is a
    /// normal end of response (the console may be waiting for input such as
    /// a password), so partial text is returned rather than an error.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the session is closed
    /// - [`Error::WriteError`] / [`Error::ReadError`] on transport failure;
    ///   the session is closed before the error is returned
    pub fn invoke_until(&mut self, command: &str, prompt: &Prompt) -> Result<String> {
        let dev = self.open.as_mut().ok_or(Error::NotOpen)?;

        debug!("Invoking {:?} (prompt {:?})", command, prompt.as_str());

        let result = exchange(dev, &self.config, command, prompt);

        if let Err(e) = &result {
            if e.closes_session() {
                warn!("Invoke of {:?} failed: {}", command, e);
                self.close();
            }
        }

        result
    }

    /// Discard bytes left on the reader endpoint by a previous exchange
    ///
    /// Returns the number of bytes discarded. An empty buffer is fine.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the session is closed
    /// - [`Error::ReadError`] on transport failure; the session is closed
    pub fn clear_read_buffer(&mut self) -> Result<usize> {
        let dev = self.open.as_mut().ok_or(Error::NotOpen)?;
        let reader = dev.endpoints.reader;

        match dev.handle.flush(reader) {
            Ok(discarded) => {
                debug!("Cleared {} stale bytes", discarded);
                Ok(discarded)
            }
            Err(e) => {
                warn!("Failed to clear read buffer: {}", e);
                self.close();
                Err(Error::ReadError(e))
            }
        }
    }
}

/// Write one framed command and read until prompt, timeout or deadline
fn exchange(
    dev: &mut OpenDevice,
    config: &SessionConfig,
    command: &str,
    prompt: &Prompt,
) -> Result<String> {
    let frame = codec::encode_command(command);

    let written = dev
        .handle
        .write(dev.endpoints.writer, &frame, config.write_timeout)
        .map_err(Error::WriteError)?;

    if written != frame.len() {
        return Err(Error::WriteError(usbcon_transport::Error::ShortWrite {
            written,
            expected: frame.len(),
        }));
    }

    let chunk_size = config.read_chunk_size.min(dev.max_packet);
    let started = Instant::now();
    let mut response = ResponseBuffer::new();

    loop {
        if let Some(deadline) = config.invoke_deadline {
            if started.elapsed() >= deadline {
                warn!(
                    "No prompt within {:?}; returning {} bytes read so far",
                    deadline,
                    response.as_str().len()
                );
                break;
            }
        }

        let outcome = dev
            .handle
            .read(dev.endpoints.reader, chunk_size, config.read_timeout)
            .map_err(Error::ReadError)?;

        match outcome {
            ReadOutcome::TimedOut => {
                trace!("Read timed out after {} chunks", response.chunks());
                break;
            }
            ReadOutcome::Data(bytes) => {
                response.push(&bytes);

                if response.is_complete(prompt) {
                    trace!("Prompt matched after {} chunks", response.chunks());
                    break;
                }
            }
        }
    }

    Ok(response.into_string())
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.open.is_some() {
            warn!("Session dropped while open; closing");
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use mockall::predicate::eq;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use usbcon_transport::{MockDeviceHandle, MockTransport};

    type Script = Arc<Mutex<VecDeque<usbcon_transport::Result<ReadOutcome>>>>;

    /// Console on a device address no other test uses
    fn console() -> DeviceDescriptor {
        static NEXT_ADDRESS: AtomicU8 = AtomicU8::new(1);
        let address = NEXT_ADDRESS.fetch_add(1, Ordering::Relaxed);
        DeviceDescriptor::new(0x14be, 0x0009).at(1, address)
    }

    fn filter() -> DeviceFilter {
        DeviceFilter::vendor(0x14be)
    }

    /// Transport listing `devices` and handing out `handles` in order
    fn transport(devices: Vec<DeviceDescriptor>, handles: Vec<MockDeviceHandle>) -> Box<MockTransport> {
        let mut transport = MockTransport::new();
        let handles = Arc::new(Mutex::new(VecDeque::from(handles)));

        transport.expect_name().return_const("mock".to_string());
        transport
            .expect_enumerate()
            .returning(move |_| Ok(devices.clone()));
        transport.expect_open().returning(move |_| {
            let handle = handles
                .lock()
                .pop_front()
                .expect("test opened more handles than it prepared");
            Ok(Box::new(handle) as Box<dyn DeviceHandle>)
        });

        Box::new(transport)
    }

    /// Whole-device handle whose configure/claim/release/reset all succeed
    fn handle() -> MockDeviceHandle {
        handle_with_packet(512)
    }

    /// Same as [`handle`] with the given reader packet size
    fn handle_with_packet(max_packet: usize) -> MockDeviceHandle {
        let mut handle = MockDeviceHandle::new();

        handle.expect_capabilities().return_const(Capabilities::all());
        handle.expect_is_open().return_const(true);
        handle
            .expect_set_configuration()
            .with(eq(1))
            .returning(|_| Ok(()));
        handle
            .expect_claim_interface()
            .with(eq(0))
            .returning(|_| Ok(()));
        handle
            .expect_release_interface()
            .with(eq(0))
            .returning(|_| Ok(()));
        handle.expect_reset().returning(|| Ok(()));
        handle
            .expect_bind_endpoints()
            .with(eq(0), eq(0x02), eq(0x81))
            .returning(move |_, _, _| Ok(max_packet));

        handle
    }

    /// Accept every write in full
    fn accept_writes(handle: &mut MockDeviceHandle) -> Arc<Mutex<Vec<u8>>> {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();

        handle
            .expect_write()
            .returning(move |endpoint, data, _| {
                assert_eq!(endpoint, 0x02);
                sink.lock().extend_from_slice(data);
                Ok(data.len())
            });

        written
    }

    /// Serve reads from a script; an exhausted script times out
    fn script_reads(
        handle: &mut MockDeviceHandle,
        script: Vec<usbcon_transport::Result<ReadOutcome>>,
    ) -> Script {
        let script: Script = Arc::new(Mutex::new(VecDeque::from(script)));
        let source = script.clone();

        handle
            .expect_read()
            .returning(move |endpoint, _, _| {
                assert_eq!(endpoint, 0x81);
                source.lock().pop_front().unwrap_or(Ok(ReadOutcome::TimedOut))
            });

        script
    }

    fn data(bytes: &'static [u8]) -> usbcon_transport::Result<ReadOutcome> {
        Ok(ReadOutcome::Data(Bytes::from_static(bytes)))
    }

    fn session(handles: Vec<MockDeviceHandle>) -> Session {
        let device = console();
        Session::with_transport(transport(vec![device], handles), &filter(), SessionConfig::default())
            .unwrap()
    }

    #[test]
    fn test_fresh_session_is_closed() {
        let session = session(vec![]);

        assert!(!session.test_session());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.device().vendor_id, 0x14be);
    }

    #[test]
    fn test_open_close() {
        let mut session = session(vec![handle()]);

        session.open().unwrap();
        assert!(session.test_session());
        assert_eq!(session.state(), SessionState::Open);

        session.close();
        assert!(!session.test_session());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_open_close_repeatable() {
        let mut session = session(vec![handle(), handle()]);

        session.open().unwrap();
        session.close();
        session.open().unwrap();
        assert!(session.test_session());
        session.close();
        assert!(!session.test_session());
    }

    #[test]
    fn test_open_is_idempotent() {
        // Only one handle prepared: a second transport open would panic
        let mut session = session(vec![handle()]);

        session.open().unwrap();
        session.open().unwrap();
        assert!(session.test_session());
    }

    #[test]
    fn test_close_when_closed_is_noop() {
        let mut session = session(vec![]);
        session.close();
        session.close();
        assert!(!session.test_session());
    }

    #[test]
    fn test_close_releases_and_resets() {
        let mut h = MockDeviceHandle::new();
        h.expect_capabilities().return_const(Capabilities::all());
        h.expect_set_configuration().returning(|_| Ok(()));
        h.expect_claim_interface().returning(|_| Ok(()));
        h.expect_bind_endpoints().returning(|_, _, _| Ok(512));
        h.expect_release_interface()
            .with(eq(0))
            .times(1)
            .returning(|_| Ok(()));
        h.expect_reset().times(1).returning(|| Ok(()));

        let mut session = session(vec![h]);
        session.open().unwrap();
        session.close();
    }

    #[test]
    fn test_close_is_best_effort() {
        let mut h = MockDeviceHandle::new();
        h.expect_capabilities().return_const(Capabilities::all());
        h.expect_set_configuration().returning(|_| Ok(()));
        h.expect_claim_interface().returning(|_| Ok(()));
        h.expect_bind_endpoints().returning(|_, _, _| Ok(512));
        h.expect_release_interface()
            .times(1)
            .returning(|_| Err(usbcon_transport::Error::Unsupported("release")));
        h.expect_reset()
            .times(1)
            .returning(|| Err(usbcon_transport::Error::Disconnected));

        let mut session = session(vec![h]);
        session.open().unwrap();
        session.close();
        assert!(!session.test_session());
    }

    #[test]
    fn test_close_skips_reset_of_unplugged_device() {
        let mut h = MockDeviceHandle::new();
        h.expect_capabilities().return_const(Capabilities::all());
        h.expect_set_configuration().returning(|_| Ok(()));
        h.expect_claim_interface().returning(|_| Ok(()));
        h.expect_bind_endpoints().returning(|_, _, _| Ok(512));
        h.expect_release_interface()
            .times(1)
            .returning(|_| Err(usbcon_transport::Error::Disconnected));
        h.expect_reset().times(0);

        let mut session = session(vec![h]);
        session.open().unwrap();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_no_reset_when_disabled() {
        let mut h = MockDeviceHandle::new();
        h.expect_capabilities().return_const(Capabilities::all());
        h.expect_set_configuration().returning(|_| Ok(()));
        h.expect_claim_interface().returning(|_| Ok(()));
        h.expect_bind_endpoints().returning(|_, _, _| Ok(512));
        h.expect_release_interface().returning(|_| Ok(()));
        h.expect_reset().times(0);

        let mut session = session(vec![h])
            .with_config(SessionConfig::default().with_reset_on_close(false))
            .unwrap();
        session.open().unwrap();
        session.close();
    }

    #[test]
    fn test_interface_only_handle_skips_configuration() {
        let mut h = MockDeviceHandle::new();
        h.expect_capabilities().return_const(Capabilities::empty());
        h.expect_bind_endpoints().returning(|_, _, _| Ok(64));
        h.expect_is_open().return_const(true);
        h.expect_set_configuration().times(0);
        h.expect_claim_interface().times(0);
        h.expect_release_interface().times(0);
        h.expect_reset().times(0);

        let mut session = session(vec![h]);
        session.open().unwrap();
        assert!(session.test_session());
        session.close();
    }

    #[test]
    fn test_open_failure_on_claim() {
        let mut failing = MockDeviceHandle::new();
        failing.expect_capabilities().return_const(Capabilities::all());
        failing.expect_set_configuration().returning(|_| Ok(()));
        failing
            .expect_claim_interface()
            .returning(|_| Err(usbcon_transport::Error::Unsupported("claim")));
        // Never claimed, so never released
        failing.expect_release_interface().times(0);
        failing.expect_reset().returning(|| Ok(()));

        let mut session = session(vec![failing, handle()]);

        let err = session.open().unwrap_err();
        assert!(matches!(err, Error::OpenFailed { step: OpenStep::Claim, .. }));
        assert!(!session.test_session());

        // Retry with a cooperative device
        session.open().unwrap();
        assert!(session.test_session());
    }

    #[test]
    fn test_open_failure_on_configure() {
        let mut failing = MockDeviceHandle::new();
        failing.expect_capabilities().return_const(Capabilities::all());
        failing
            .expect_set_configuration()
            .returning(|_| Err(usbcon_transport::Error::Disconnected));
        failing.expect_claim_interface().times(0);
        failing.expect_reset().returning(|| Ok(()));

        let mut session = session(vec![failing]);

        let err = session.open().unwrap_err();
        assert!(matches!(err, Error::OpenFailed { step: OpenStep::Configure, .. }));
        assert!(err.closes_session());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_open_failure_on_endpoints() {
        let mut failing = MockDeviceHandle::new();
        failing.expect_capabilities().return_const(Capabilities::all());
        failing.expect_set_configuration().returning(|_| Ok(()));
        failing.expect_claim_interface().returning(|_| Ok(()));
        failing
            .expect_bind_endpoints()
            .with(eq(0), eq(0x03), eq(0x83))
            .times(1)
            .returning(|interface, endpoint, _| {
                Err(usbcon_transport::Error::NoSuchEndpoint { interface, endpoint })
            });
        // Claimed before the failure, so released by the cleanup
        failing.expect_release_interface().times(1).returning(|_| Ok(()));
        failing.expect_reset().returning(|| Ok(()));
        failing.expect_write().times(0);

        let config = SessionConfig::default().with_endpoints(EndpointPair::new(0x03, 0x83));
        let mut session = session(vec![failing]).with_config(config).unwrap();

        let err = session.open().unwrap_err();
        assert!(matches!(
            err,
            Error::OpenFailed {
                step: OpenStep::Endpoints,
                source: usbcon_transport::Error::NoSuchEndpoint { endpoint: 0x03, .. },
            }
        ));
        assert!(!session.test_session());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_reopen_after_reenumeration() {
        let before = console();
        let after = console();
        let old_key = before.key();

        let mut transport = MockTransport::new();
        transport.expect_name().return_const("mock".to_string());

        // Reset on close moves the device to a new address
        let mut listings = VecDeque::from(vec![vec![before], vec![after.clone()]]);
        transport.expect_enumerate().returning(move |_| {
            let listing = if listings.len() > 1 {
                listings.pop_front()
            } else {
                listings.front().cloned()
            };
            Ok(listing.unwrap_or_default())
        });

        let mut handles = VecDeque::from(vec![handle(), handle()]);
        let mut opens_at_old_key = 0;
        transport.expect_open().returning(move |d| {
            if d.key() == old_key {
                opens_at_old_key += 1;
                if opens_at_old_key > 1 {
                    return Err(usbcon_transport::Error::DeviceGone(d.to_string()));
                }
            }
            let handle = handles.pop_front().expect("only two opens prepared");
            Ok(Box::new(handle) as Box<dyn DeviceHandle>)
        });

        let mut session =
            Session::with_transport(Box::new(transport), &filter(), SessionConfig::default())
                .unwrap();

        session.open().unwrap();
        session.close();
        session.open().unwrap();

        assert!(session.test_session());
        assert_eq!(session.device().key(), after.key());
        assert!(crate::is_device_bound(after.key()));
        assert!(!crate::is_device_bound(old_key));
    }

    #[test]
    fn test_open_failure_on_device_open() {
        let device = console();
        let mut transport = MockTransport::new();
        transport.expect_name().return_const("mock".to_string());
        transport
            .expect_enumerate()
            .returning(move |_| Ok(vec![device.clone()]));
        transport
            .expect_open()
            .returning(|d| Err(usbcon_transport::Error::DeviceGone(d.to_string())));

        let mut session =
            Session::with_transport(Box::new(transport), &filter(), SessionConfig::default())
                .unwrap();

        let err = session.open().unwrap_err();
        assert!(matches!(err, Error::OpenFailed { step: OpenStep::Open, .. }));
        assert!(!session.test_session());
    }

    #[test]
    fn test_invoke_empty_command() {
        let mut h = handle();
        let written = accept_writes(&mut h);
        script_reads(&mut h, vec![]);

        let mut session = session(vec![h]);
        session.open().unwrap();

        let response = session.invoke("").unwrap();
        assert_eq!(response, "");
        assert_eq!(written.lock().as_slice(), b"\r\n");
        assert!(session.test_session());
    }

    #[test]
    fn test_invoke_stops_at_prompt() {
        let mut h = handle();
        let written = accept_writes(&mut h);
        let script = script_reads(
            &mut h,
            vec![
                data(b"VER -V\r\n"),
                data(b"CP3 Cntrl Eng [v1.601.3934]\r\n"),
                data(b"CP3>"),
                data(b"trailing"),
            ],
        );

        let mut session = session(vec![h]);
        session.open().unwrap();

        let response = session.invoke("VER -V").unwrap();
        assert_eq!(response, "VER -V\r\nCP3 Cntrl Eng [v1.601.3934]\r\nCP3>");
        assert_eq!(written.lock().as_slice(), b"VER -V\r\n");

        // Nothing read past the prompt
        assert_eq!(script.lock().len(), 1);
    }

    #[test]
    fn test_reads_capped_at_packet_size() {
        let mut h = handle_with_packet(64);
        accept_writes(&mut h);
        h.expect_read()
            .with(eq(0x81), eq(64), eq(Duration::from_millis(100)))
            .times(2)
            .returning({
                let mut sent = false;
                move |_, _, _| {
                    if sent {
                        return Ok(ReadOutcome::TimedOut);
                    }
                    sent = true;
                    Ok(ReadOutcome::Data(Bytes::from_static(b"CP3 Cntrl Eng\r\n")))
                }
            });

        let mut session = session(vec![h]);
        session.open().unwrap();

        assert_eq!(session.config().read_chunk_size, 1024);
        assert_eq!(session.invoke("VER -V").unwrap(), "CP3 Cntrl Eng\r\n");
    }

    #[test]
    fn test_invoke_returns_partial_text_on_timeout() {
        let mut h = handle();
        accept_writes(&mut h);
        script_reads(
            &mut h,
            vec![data(b"Password: "), Ok(ReadOutcome::TimedOut), data(b"late>")],
        );

        let mut session = session(vec![h]);
        session.open().unwrap();

        let response = session.invoke("LOGIN admin").unwrap();
        assert_eq!(response, "Password: ");
        assert!(session.test_session());
    }

    #[test]
    fn test_invoke_with_custom_prompt() {
        let mut h = handle();
        accept_writes(&mut h);
        script_reads(
            &mut h,
            vec![data(b"a > b\r\n"), data(b"[admin@cp3]# "), data(b"more")],
        );

        let mut session = session(vec![h]);
        session.open().unwrap();

        let response = session.invoke_with_prompt("ECHO a > b", r"\]# $").unwrap();
        assert_eq!(response, "a > b\r\n[admin@cp3]# ");
    }

    #[test]
    fn test_invoke_with_invalid_prompt() {
        let mut h = handle();
        h.expect_write().times(0);

        let mut session = session(vec![h]);
        session.open().unwrap();

        let err = session.invoke_with_prompt("VER", "(").unwrap_err();
        assert!(matches!(err, Error::Core(usbcon_core::Error::InvalidPrompt(_))));
        assert!(session.test_session());
    }

    #[test]
    fn test_invoke_honors_deadline() {
        let mut h = handle();
        accept_writes(&mut h);
        h.expect_read()
            .returning(|_, _, _| Ok(ReadOutcome::Data(Bytes::from_static(b"."))));

        let config = SessionConfig::default().with_invoke_deadline(Some(Duration::from_millis(20)));
        let mut session = session(vec![h]).with_config(config).unwrap();
        session.open().unwrap();

        let response = session.invoke("TAIL -F").unwrap();
        assert!(!response.is_empty());
        assert!(response.chars().all(|c| c == '.'));
        assert!(session.test_session());
    }

    #[test]
    fn test_invoke_when_closed() {
        let mut session = session(vec![]);

        assert!(matches!(session.invoke("VER"), Err(Error::NotOpen)));
        assert!(matches!(session.invoke_with_prompt("VER", "("), Err(Error::NotOpen)));
        assert!(matches!(
            session.invoke_until("VER", &Prompt::default()),
            Err(Error::NotOpen)
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_write_error_closes_session() {
        let mut h = MockDeviceHandle::new();
        h.expect_capabilities().return_const(Capabilities::all());
        h.expect_is_open().return_const(true);
        h.expect_set_configuration().returning(|_| Ok(()));
        h.expect_claim_interface().returning(|_| Ok(()));
        h.expect_bind_endpoints().returning(|_, _, _| Ok(512));
        h.expect_release_interface().times(1).returning(|_| Ok(()));
        h.expect_reset().returning(|| Ok(()));
        h.expect_write()
            .returning(|_, _, _| Err(usbcon_transport::Error::Disconnected));
        h.expect_read().times(0);

        let mut session = session(vec![h]);
        session.open().unwrap();

        let err = session.invoke("VER").unwrap_err();
        assert!(matches!(err, Error::WriteError(_)));
        assert!(!session.test_session());
        assert!(matches!(session.invoke("VER"), Err(Error::NotOpen)));
    }

    #[test]
    fn test_short_write_closes_session() {
        let mut h = handle();
        h.expect_write().returning(|_, data, _| Ok(data.len() - 1));

        let mut session = session(vec![h]);
        session.open().unwrap();

        let err = session.invoke("VER").unwrap_err();
        assert!(matches!(
            err,
            Error::WriteError(usbcon_transport::Error::ShortWrite { written: 4, expected: 5 })
        ));
        assert!(!session.test_session());
    }

    #[test]
    fn test_read_error_closes_session() {
        let mut h = handle();
        accept_writes(&mut h);
        script_reads(
            &mut h,
            vec![data(b"VER"), Err(usbcon_transport::Error::Disconnected)],
        );

        let mut session = session(vec![h]);
        session.open().unwrap();

        let err = session.invoke("VER").unwrap_err();
        assert!(matches!(err, Error::ReadError(usbcon_transport::Error::Disconnected)));
        assert!(err.closes_session());
        assert!(!session.test_session());
    }

    #[test]
    fn test_clear_read_buffer() {
        let mut h = handle();
        h.expect_flush().with(eq(0x81)).times(2).returning(|_| Ok(0));

        let mut session = session(vec![h]);
        assert!(matches!(session.clear_read_buffer(), Err(Error::NotOpen)));

        session.open().unwrap();
        assert_eq!(session.clear_read_buffer().unwrap(), 0);
        assert_eq!(session.clear_read_buffer().unwrap(), 0);
        assert!(session.test_session());
    }

    #[test]
    fn test_clear_read_buffer_failure_closes_session() {
        let mut h = handle();
        h.expect_flush()
            .returning(|_| Err(usbcon_transport::Error::Disconnected));

        let mut session = session(vec![h]);
        session.open().unwrap();

        assert!(matches!(session.clear_read_buffer(), Err(Error::ReadError(_))));
        assert!(!session.test_session());
    }

    #[test]
    fn test_lost_device_fails_test_session() {
        let mut h = MockDeviceHandle::new();
        h.expect_capabilities().return_const(Capabilities::empty());
        h.expect_bind_endpoints().returning(|_, _, _| Ok(64));
        h.expect_is_open().return_const(false);

        let mut session = session(vec![h]);
        session.open().unwrap();

        assert_eq!(session.state(), SessionState::Open);
        assert!(!session.test_session());
    }

    #[test]
    fn test_no_device_found() {
        let other = DeviceDescriptor::new(0x046d, 0xc52b).at(3, 1);
        let result = Session::with_transport(
            transport(vec![other], vec![]),
            &filter(),
            SessionConfig::default(),
        );

        let err = result.err().unwrap();
        assert!(err.is_no_device());
    }

    #[test]
    fn test_ambiguous_device() {
        let result = Session::with_transport(
            transport(vec![console(), console()], vec![]),
            &filter(),
            SessionConfig::default(),
        );

        let err = result.err().unwrap();
        assert!(err.is_ambiguous());
        assert!(matches!(
            err,
            Error::Core(usbcon_core::Error::AmbiguousDevice { count: 2, .. })
        ));
    }

    #[test]
    fn test_name_filter_requests_strings() {
        let device = console().with_product("Control Processor");
        let mut transport = MockTransport::new();
        transport.expect_name().return_const("mock".to_string());
        transport
            .expect_enumerate()
            .with(eq(true))
            .times(1)
            .returning(move |_| Ok(vec![device.clone()]));

        let session = Session::with_transport(
            Box::new(transport),
            &DeviceFilter::name("Processor$").unwrap(),
            SessionConfig::default(),
        )
        .unwrap();

        assert_eq!(session.device().product.as_deref(), Some("Control Processor"));
    }

    #[test]
    fn test_device_bound_to_one_session() {
        let device = console();

        let first = Session::with_transport(
            transport(vec![device.clone()], vec![]),
            &filter(),
            SessionConfig::default(),
        )
        .unwrap();
        assert!(crate::is_device_bound(device.key()));

        let second = Session::with_transport(
            transport(vec![device.clone()], vec![]),
            &filter(),
            SessionConfig::default(),
        );
        assert!(matches!(second, Err(Error::DeviceInUse(key)) if key == device.key()));

        drop(first);
        assert!(!crate::is_device_bound(device.key()));

        Session::with_transport(
            transport(vec![device], vec![]),
            &filter(),
            SessionConfig::default(),
        )
        .unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SessionConfig::default().with_read_chunk_size(0);
        let result = Session::with_transport(transport(vec![console()], vec![]), &filter(), config);

        assert!(matches!(result, Err(Error::Types(_))));
    }

    #[test]
    fn test_exit_closes_and_tears_down() {
        let device = console();
        let h = handle();

        let mut transport = MockTransport::new();
        transport.expect_name().return_const("mock".to_string());
        transport
            .expect_enumerate()
            .returning(move |_| Ok(vec![device.clone()]));
        transport
            .expect_open()
            .return_once(move |_| Ok(Box::new(h) as Box<dyn DeviceHandle>));
        transport.expect_teardown().times(1).return_const(());

        let mut session =
            Session::with_transport(Box::new(transport), &filter(), SessionConfig::default())
                .unwrap();
        let key = session.device().key();

        session.open().unwrap();
        session.exit();

        assert!(!crate::is_device_bound(key));
    }

    #[test]
    fn test_drop_closes_open_session() {
        let mut h = MockDeviceHandle::new();
        h.expect_capabilities().return_const(Capabilities::all());
        h.expect_set_configuration().returning(|_| Ok(()));
        h.expect_claim_interface().returning(|_| Ok(()));
        h.expect_bind_endpoints().returning(|_, _, _| Ok(512));
        h.expect_release_interface().times(1).returning(|_| Ok(()));
        h.expect_reset().times(1).returning(|| Ok(()));

        let mut session = session(vec![h]);
        session.open().unwrap();
        drop(session);
    }

    #[test]
    fn test_echo_off_flush_version_sequence() {
        let mut h = handle();
        accept_writes(&mut h);
        script_reads(
            &mut h,
            vec![
                data(b"\r\nCP3>"),
                data(b"ECHO OFF\r\nCP3>"),
                data(b"CP3 Cntrl Eng [v1.601.3934]\r\nCP3>"),
            ],
        );
        h.expect_flush().returning(|_| Ok(0));

        let mut session = session(vec![h]);
        session.open().unwrap();
        assert!(session.test_session());

        session.invoke("").unwrap();
        session.invoke("ECHO OFF").unwrap();
        session.clear_read_buffer().unwrap();
        let version = session.invoke("VER -V").unwrap();
        session.close();

        assert!(version.contains("v1.601"));
        assert!(!session.test_session());
    }

    #[test]
    #[ignore] // Only run with real device
    fn test_real_device_version() {
        let mut session = Session::new().unwrap();

        session.open().unwrap();
        assert!(session.test_session());

        session.invoke("").unwrap();
        session.invoke("ECHO OFF").unwrap();
        session.clear_read_buffer().unwrap();

        let version = session.invoke("VER -V").unwrap();
        println!("{}", version);
        assert!(!version.is_empty());

        session.close();
        assert!(!session.test_session());
    }

    #[test]
    #[ignore] // Only run with real device
    fn test_real_device_repeated_open_close() {
        let mut session = Session::new().unwrap();

        for _ in 0..3 {
            session.open().unwrap();
            session.invoke("VER -V").unwrap();
            session.close();
            assert!(!session.test_session());
        }

        session.exit();
    }
}
