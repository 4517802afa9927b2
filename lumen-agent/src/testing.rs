//! In-memory fakes shared by the agent's unit tests

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lumen_client::{ClientError, NextJob, Result as ClientResult};
use lumen_core::domain::job::{JobId, JobResultPayload};
use lumen_core::domain::message::Message;
use lumen_core::domain::pipeline::{CurvePoint, WhiteBalance};
use lumen_core::dto::messaging::{HandshakeRequest, HandshakeResponse, PollResponse, SendResponse};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::clock::Clock;
use crate::host::{
    Catalog, EditingHost, HostError, PhotoId, Preset, PresetFolder, PresetRepository,
};
use crate::repository::{JobRepository, MessageRepository};

// =============================================================================
// Clock
// =============================================================================

pub struct FixedClock(pub DateTime<Utc>);

impl Default for FixedClock {
    fn default() -> Self {
        Self(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// =============================================================================
// Editing host
// =============================================================================

/// A successful host mutation
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    VirtualCopy(String),
    Snapshot(String, String),
    SetValue(String, Value),
    WhiteBalance(WhiteBalance),
    ToneCurve(String, Vec<CurvePoint>),
    ApplyPreset(String),
}

/// Editing host that records mutations and fails on request
#[derive(Default)]
pub struct FakeHost {
    selected: Option<PhotoId>,
    failing_keys: HashSet<String>,
    no_copies: bool,
    failing_snapshot: bool,
    /// Scopes whose changes fail to persist after the body ran
    failing_scopes: HashSet<String>,
    /// Scopes refused before the body runs
    refused_scopes: HashSet<String>,
    /// Every call made on the host, including reads
    pub call_count: AtomicUsize,
    /// Mutations that succeeded, in order
    pub applied: Mutex<Vec<HostCall>>,
    pub statuses: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn with_selected(photo: &str) -> Self {
        Self {
            selected: Some(PhotoId::new(photo)),
            ..Self::default()
        }
    }

    pub fn failing_key(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    pub fn without_copies(mut self) -> Self {
        self.no_copies = true;
        self
    }

    pub fn failing_snapshot(mut self) -> Self {
        self.failing_snapshot = true;
        self
    }

    pub fn failing_scope(mut self, action: &str) -> Self {
        self.failing_scopes.insert(action.to_string());
        self
    }

    pub fn refusing_scope(mut self, action: &str) -> Self {
        self.refused_scopes.insert(action.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn applied(&self) -> Vec<HostCall> {
        self.applied.lock().unwrap().clone()
    }

    /// Names of the settings assigned through `set_value`
    pub fn applied_settings(&self) -> Vec<String> {
        self.applied()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::SetValue(name, _) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) {
        self.applied.lock().unwrap().push(call);
    }

    fn check_key(&self, key: &str) -> Result<(), HostError> {
        if self.failing_keys.contains(key) {
            return Err(HostError::InvalidValue {
                name: key.to_string(),
                reason: "rejected by test host".to_string(),
            });
        }
        Ok(())
    }
}

struct FakeCatalog<'a> {
    host: &'a FakeHost,
}

impl Catalog for FakeCatalog<'_> {
    fn create_virtual_copy(&mut self, photo: &PhotoId) -> Result<Option<PhotoId>, HostError> {
        self.host.call_count.fetch_add(1, Ordering::SeqCst);
        if self.host.no_copies {
            return Ok(None);
        }
        let copy = format!("{}/copy-1", photo);
        self.host.record(HostCall::VirtualCopy(copy.clone()));
        Ok(Some(PhotoId::new(copy)))
    }

    fn create_snapshot(&mut self, photo: &PhotoId, name: &str) -> Result<(), HostError> {
        self.host.call_count.fetch_add(1, Ordering::SeqCst);
        if self.host.failing_snapshot {
            return Err(HostError::WriteAccess("snapshots disabled".to_string()));
        }
        self.host
            .record(HostCall::Snapshot(photo.to_string(), name.to_string()));
        Ok(())
    }

    fn set_value(&mut self, _photo: &PhotoId, name: &str, value: &Value) -> Result<(), HostError> {
        self.host.call_count.fetch_add(1, Ordering::SeqCst);
        self.host.check_key(name)?;
        self.host
            .record(HostCall::SetValue(name.to_string(), value.clone()));
        Ok(())
    }

    fn set_white_balance(
        &mut self,
        _photo: &PhotoId,
        white_balance: &WhiteBalance,
    ) -> Result<(), HostError> {
        self.host.call_count.fetch_add(1, Ordering::SeqCst);
        self.host.check_key("WhiteBalance")?;
        self.host.record(HostCall::WhiteBalance(white_balance.clone()));
        Ok(())
    }

    fn set_tone_curve(
        &mut self,
        _photo: &PhotoId,
        channel: &str,
        points: &[CurvePoint],
    ) -> Result<(), HostError> {
        self.host.call_count.fetch_add(1, Ordering::SeqCst);
        self.host.check_key("ToneCurve")?;
        self.host
            .record(HostCall::ToneCurve(channel.to_string(), points.to_vec()));
        Ok(())
    }

    fn apply_preset(&mut self, _photo: &PhotoId, preset: &Preset) -> Result<(), HostError> {
        self.host.call_count.fetch_add(1, Ordering::SeqCst);
        self.host.check_key(&preset.name)?;
        self.host.record(HostCall::ApplyPreset(preset.name.clone()));
        Ok(())
    }
}

impl EditingHost for FakeHost {
    fn selected_photo(&self) -> Result<Option<PhotoId>, HostError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.selected.clone())
    }

    fn with_write_access(
        &self,
        action: &str,
        body: &mut dyn FnMut(&mut dyn Catalog) -> Result<(), HostError>,
    ) -> Result<(), HostError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.refused_scopes.contains(action) {
            return Err(HostError::WriteAccess(format!("{} refused", action)));
        }
        body(&mut FakeCatalog { host: self })?;
        if self.failing_scopes.contains(action) {
            return Err(HostError::WriteAccess(format!("{} not saved", action)));
        }
        Ok(())
    }

    fn show_status(&self, message: &str) {
        self.statuses.lock().unwrap().push(message.to_string());
    }
}

/// Preset repository serving a fixed folder tree
#[derive(Default)]
pub struct FakePresets {
    pub folders: Vec<PresetFolder>,
}

impl FakePresets {
    pub fn with_presets(names: &[&str]) -> Self {
        Self {
            folders: vec![PresetFolder {
                name: "User Presets".to_string(),
                presets: names
                    .iter()
                    .map(|name| Preset {
                        name: name.to_string(),
                        settings: Default::default(),
                    })
                    .collect(),
                children: Vec::new(),
            }],
        }
    }
}

impl PresetRepository for FakePresets {
    fn preset_folders(&self) -> Result<Vec<PresetFolder>, HostError> {
        Ok(self.folders.clone())
    }
}

// =============================================================================
// Coordination service
// =============================================================================

/// Scripted `GET /job/next` responses; falls back to `Empty` when drained
#[derive(Default)]
pub struct FakeJobs {
    responses: Mutex<VecDeque<ClientResult<NextJob>>>,
    pub fetches: AtomicUsize,
    pub results: Mutex<Vec<(JobId, JobResultPayload)>>,
    /// When set, `fetch_next_job` waits for a notification before answering
    pub gate: Option<Arc<Notify>>,
    fail_submit: bool,
}

impl FakeJobs {
    pub fn with_responses(responses: Vec<ClientResult<NextJob>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn with_job(body: &str) -> Self {
        Self::with_responses(vec![Ok(NextJob::Available(body.to_string()))])
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn results(&self) -> Vec<(JobId, JobResultPayload)> {
        self.results.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobRepository for FakeJobs {
    async fn fetch_next_job(&self) -> ClientResult<NextJob> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(NextJob::Empty))
    }

    async fn submit_result(&self, job_id: &JobId, result: &JobResultPayload) -> ClientResult<()> {
        self.results
            .lock()
            .unwrap()
            .push((job_id.clone(), result.clone()));
        if self.fail_submit {
            return Err(ClientError::api_error(500, "result store unavailable"));
        }
        Ok(())
    }
}

/// Scripted messaging endpoints
///
/// Handshakes answer from `handshakes` (then repeat the last default);
/// polls answer from `polls` and hang forever once the script runs out.
pub struct FakeMessages {
    handshakes: Mutex<VecDeque<ClientResult<HandshakeResponse>>>,
    handshake_default_ok: bool,
    polls: Mutex<VecDeque<ClientResult<PollResponse>>>,
    pub handshake_times: Mutex<Vec<tokio::time::Instant>>,
    pub sent: Mutex<Vec<Message>>,
    pub poll_count: AtomicUsize,
    poll_gate: Option<Arc<Notify>>,
    held_send: Option<(String, Arc<Notify>)>,
}

impl FakeMessages {
    /// Every handshake succeeds with client id `client-1`
    pub fn accepting() -> Self {
        Self {
            handshakes: Mutex::new(VecDeque::new()),
            handshake_default_ok: true,
            polls: Mutex::new(VecDeque::new()),
            handshake_times: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            poll_count: AtomicUsize::new(0),
            poll_gate: None,
            held_send: None,
        }
    }

    /// Every handshake fails
    pub fn refusing() -> Self {
        Self {
            handshake_default_ok: false,
            ..Self::accepting()
        }
    }

    pub fn with_polls(self, polls: Vec<ClientResult<PollResponse>>) -> Self {
        *self.polls.lock().unwrap() = polls.into();
        self
    }

    pub fn with_handshakes(self, handshakes: Vec<ClientResult<HandshakeResponse>>) -> Self {
        *self.handshakes.lock().unwrap() = handshakes.into();
        self
    }

    /// Each poll waits for a permit on `gate` before answering
    pub fn gated_polls(mut self, gate: Arc<Notify>) -> Self {
        self.poll_gate = Some(gate);
        self
    }

    /// Sending a message of type `kind` waits for a permit on `gate`
    pub fn holding_send(mut self, kind: &str, gate: Arc<Notify>) -> Self {
        self.held_send = Some((kind.to_string(), gate));
        self
    }

    pub fn handshake_count(&self) -> usize {
        self.handshake_times.lock().unwrap().len()
    }

    pub fn sent_kinds(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m.kind().map(str::to_string))
            .collect()
    }
}

pub fn accepted_handshake(client_id: &str) -> HandshakeResponse {
    HandshakeResponse {
        success: true,
        client_id: Some(client_id.to_string()),
    }
}

#[async_trait]
impl MessageRepository for FakeMessages {
    async fn handshake(&self, _req: &HandshakeRequest) -> ClientResult<HandshakeResponse> {
        self.handshake_times
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());

        let scripted = self.handshakes.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None if self.handshake_default_ok => Ok(accepted_handshake("client-1")),
            None => Err(ClientError::api_error(503, "coordinator starting")),
        }
    }

    async fn poll_messages(&self, _client_id: &str) -> ClientResult<PollResponse> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.poll_gate {
            gate.notified().await;
        }
        let scripted = self.polls.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }

    async fn send_message(&self, _client_id: &str, message: &Message) -> ClientResult<SendResponse> {
        if let Some((kind, gate)) = &self.held_send {
            if message.kind() == Some(kind.as_str()) {
                gate.notified().await;
            }
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(SendResponse { success: true })
    }
}
