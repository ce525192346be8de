// Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sealed_print::config::EngineConfig;
use sealed_print::crypto::{
    ContentKey, CryptoError, DeviceKeys, KeyUnwrapper, UnwrapService, seal_payload,
    wrap_for_device, wrap_legacy,
};
use sealed_print::metadata::JobMetadata;
use sealed_print::print_job::controller::CancelHandle;
use sealed_print::print_job::dispatcher::{
    CommandDispatcher, DispatchError, DispatchOutcome, StatusFields,
};
use sealed_print::print_job::{EncryptedJob, JobPhase, PrintJobController, TickOutcome};
use zeroize::Zeroizing;

pub const IV: [u8; 16] = [0x42; 16];
pub const DEVICE_SECRET: [u8; 32] = [0x5a; 32];

/// Records everything the controller sends; can be told to refuse or stall.
#[derive(Debug)]
pub struct RecordingDispatcher {
    pub dispatched: Vec<String>,
    pub statuses: Vec<StatusFields>,
    pub registrations: Vec<(String, u64)>,
    pub unregistered: usize,
    pub accept_registration: bool,
    pub reject_line: Option<String>,
    pub busy_calls: usize,
    pub busy_results: usize,
    /// Busy answers to hand out right after a rejection.
    pub busy_after_reject: usize,
    pub cancel_after: Option<(usize, CancelHandle)>,
}

impl Default for RecordingDispatcher {
    fn default() -> Self {
        Self {
            dispatched: Vec::new(),
            statuses: Vec::new(),
            registrations: Vec::new(),
            unregistered: 0,
            accept_registration: true,
            reject_line: None,
            busy_calls: 0,
            busy_results: 0,
            busy_after_reject: 0,
            cancel_after: None,
        }
    }
}

impl RecordingDispatcher {
    pub fn rejecting(line: &str) -> Self {
        Self {
            reject_line: Some(line.to_string()),
            ..Self::default()
        }
    }

    pub fn busy_for(calls: usize) -> Self {
        Self {
            busy_calls: calls,
            ..Self::default()
        }
    }
}

impl CommandDispatcher for RecordingDispatcher {
    fn dispatch(&mut self, line: &str) -> Result<DispatchOutcome, DispatchError> {
        if self.busy_calls > 0 {
            self.busy_calls -= 1;
            self.busy_results += 1;
            return Ok(DispatchOutcome::Busy);
        }
        if self.reject_line.as_deref() == Some(line) {
            self.busy_calls = self.busy_after_reject;
            return Err(DispatchError::CommandRejected {
                line: line.to_string(),
                reason: "move out of range".to_string(),
            });
        }
        self.dispatched.push(line.to_string());
        if let Some((after, handle)) = &self.cancel_after {
            if self.dispatched.len() == *after {
                handle.cancel();
            }
        }
        Ok(DispatchOutcome::Accepted)
    }

    fn set_status(&mut self, fields: &StatusFields) {
        self.statuses.push(fields.clone());
    }

    fn register_stream(&mut self, virtual_filename: &str, size: u64, _metadata: &JobMetadata) -> bool {
        self.registrations.push((virtual_filename.to_string(), size));
        self.accept_registration
    }

    fn unregister(&mut self) {
        self.unregistered += 1;
    }
}

/// Releases one wrapping key for one reference.
pub struct StubUnwrapService {
    pub wrapping_key: Vec<u8>,
    pub reference: String,
    pub calls: AtomicUsize,
    /// Cancelled while the key is being fetched.
    pub cancel_on_fetch: OnceLock<CancelHandle>,
}

impl StubUnwrapService {
    pub fn new(wrapping_key: &[u8], reference: &str) -> Self {
        Self {
            wrapping_key: wrapping_key.to_vec(),
            reference: reference.to_string(),
            calls: AtomicUsize::new(0),
            cancel_on_fetch: OnceLock::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnwrapService for StubUnwrapService {
    async fn fetch_wrapping_key(&self, reference: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.cancel_on_fetch.get() {
            handle.cancel();
        }
        if reference == self.reference {
            Ok(Zeroizing::new(self.wrapping_key.clone()))
        } else {
            Err(CryptoError::KeyUnavailable(format!("unknown reference {}", reference)))
        }
    }
}

pub fn device_keys() -> DeviceKeys {
    DeviceKeys::from_secret_bytes(DEVICE_SECRET)
}

pub fn content_key() -> ContentKey {
    ContentKey::from_slice(&[0x11; 32]).unwrap()
}

/// A small sliced file: header summary, `layers` numbered layers with two
/// extruding moves each (1 mm apiece, absolute E), and a cool-down footer.
pub fn sample_gcode(layers: u32) -> String {
    let mut gcode = format!(
        ";FLAVOR:Marlin\n;TIME:3723\n;Filament used: 1.5m\n;LAYER_COUNT:{}\nG28\nG92 E0\n",
        layers
    );
    let mut e = 0.0;
    for layer in 0..layers {
        gcode.push_str(&format!(";LAYER:{}\n", layer));
        gcode.push_str(&format!("G1 Z{:.1} F3000\n", (layer + 1) as f64 * 0.2));
        e += 1.0;
        gcode.push_str(&format!("G1 X10 Y10 E{:.1}\n", e));
        e += 1.0;
        gcode.push_str(&format!("G1 X20 Y10 E{:.1}\n", e));
    }
    gcode.push_str("M104 S0\nM140 S0\n");
    gcode
}

/// Seals `plaintext` for the fixture device over the ephemeral path.
pub fn sealed_job(job_id: &str, plaintext: &str) -> EncryptedJob {
    let key = content_key();
    let package = wrap_for_device(&device_keys().public_key(), &key).unwrap();
    let payload = seal_payload(plaintext.as_bytes(), &key, &IV).unwrap();
    EncryptedJob::new(job_id, payload, package, IV).with_filename(format!("{}.gcode", job_id))
}

/// Seals `plaintext` over the legacy path, wrapped with `wrapping_key`.
pub fn legacy_job(job_id: &str, plaintext: &str, wrapping_key: &[u8], reference: &str) -> EncryptedJob {
    let key = content_key();
    let package = wrap_legacy(wrapping_key, &key, &[0x24; 16]).unwrap();
    let payload = seal_payload(plaintext.as_bytes(), &key, &IV).unwrap();
    EncryptedJob::new(job_id, payload, package, IV).with_kek_reference(reference)
}

/// Sends library logs to the test harness's captured output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn unwrapper() -> KeyUnwrapper {
    init_tracing();
    KeyUnwrapper::new().with_device_keys(device_keys())
}

pub fn controller_with(
    config: EngineConfig,
    dispatcher: RecordingDispatcher,
) -> PrintJobController<RecordingDispatcher> {
    PrintJobController::new(config, unwrapper(), dispatcher)
}

pub fn controller(dispatcher: RecordingDispatcher) -> PrintJobController<RecordingDispatcher> {
    controller_with(EngineConfig::default(), dispatcher)
}

/// Ticks until the job leaves `printing`.
pub fn drive<D: CommandDispatcher>(controller: &mut PrintJobController<D>) -> JobPhase {
    for _ in 0..10_000 {
        match controller.tick() {
            TickOutcome::Finished(phase) => return phase,
            TickOutcome::Idle => return controller.state().phase,
            TickOutcome::Yield | TickOutcome::Backoff(_) => {}
        }
    }
    panic!("job did not reach a terminal phase");
}

pub fn non_blank_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}
