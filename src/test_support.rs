//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeProvider`] models the provider's eventual consistency: attach and
//! detach requests only record an in-flight event, and the ownership change
//! becomes visible after a configurable number of observations
//! (`get_volume` / `get_event` calls). [`ScriptedTools`] keeps an in-memory
//! view of formatted devices and mounts.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};

use crate::provider::{
    EntityKind, EventAction, EventId, EventStatus, LifecycleEvent, Node, NodeId, Provider,
    ProviderError, ProviderFuture, Volume, VolumeFilter, VolumeId, VolumeSpec,
};
use crate::tools::{LocalToolError, LocalTools};

const GIB: u64 = 1024 * 1024 * 1024;
const CREATED: &str = "2026-01-01T00:00:00";

/// Number of observations before a transition becomes visible.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delay {
    /// Visible on the given observation; zero applies immediately.
    Ticks(u32),
    /// Never visible.
    Never,
}

impl Default for Delay {
    fn default() -> Self {
        Self::Ticks(1)
    }
}

/// Ownership change started outside the code under test, such as another
/// node detaching.
#[derive(Clone, Debug)]
pub struct Transition {
    action: EventAction,
    owner: Option<NodeId>,
    delay: Delay,
}

impl Transition {
    /// Attach to `node`.
    #[must_use]
    pub fn attach_to(node: &str) -> Self {
        Self {
            action: EventAction::Attach,
            owner: Some(NodeId::from(node)),
            delay: Delay::default(),
        }
    }

    /// Detach from the current owner.
    #[must_use]
    pub fn detach() -> Self {
        Self {
            action: EventAction::Detach,
            owner: None,
            delay: Delay::default(),
        }
    }

    /// Becomes visible on the `ticks`-th observation.
    #[must_use]
    pub fn after(mut self, ticks: u32) -> Self {
        self.delay = Delay::Ticks(ticks);
        self
    }

    /// Never becomes visible.
    #[must_use]
    pub fn never(mut self) -> Self {
        self.delay = Delay::Never;
        self
    }
}

/// Builder for seeded volumes.
#[derive(Clone, Debug)]
pub struct VolumeBuilder {
    volume: Volume,
}

impl VolumeBuilder {
    /// Starts a detached 10 GiB volume in `us-east`.
    #[must_use]
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            volume: Volume {
                id: VolumeId::from(id),
                label: label.to_owned(),
                region: String::from("us-east"),
                size_bytes: 10 * GIB,
                owner: None,
                device_path: None,
                tags: std::collections::BTreeSet::new(),
                created: Some(String::from(CREATED)),
            },
        }
    }

    /// Sets the region.
    #[must_use]
    pub fn region(mut self, region: &str) -> Self {
        self.volume.region = region.to_owned();
        self
    }

    /// Sets the owning node.
    #[must_use]
    pub fn owner(mut self, node: &str) -> Self {
        self.volume.owner = Some(NodeId::from(node));
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, tag: &str) -> Self {
        self.volume.tags.insert(tag.to_owned());
        self
    }

    /// Sets the size in GiB.
    #[must_use]
    pub const fn size_gib(mut self, size: u64) -> Self {
        self.volume.size_bytes = size * GIB;
        self
    }

    /// Finishes the volume.
    #[must_use]
    pub fn build(self) -> Volume {
        self.volume
    }
}

/// Provider call recorded by [`FakeProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// `find_volumes`.
    FindVolumes(VolumeFilter),
    /// `create_volume`.
    CreateVolume(VolumeSpec),
    /// `delete_volume`.
    DeleteVolume(VolumeId),
    /// `attach_volume`.
    AttachVolume(VolumeId, NodeId),
    /// `detach_volume`.
    DetachVolume(VolumeId),
    /// `get_volume`.
    GetVolume(VolumeId),
    /// `list_instances`.
    ListInstances(Option<String>),
    /// `instance_addresses`.
    InstanceAddresses(NodeId),
    /// `list_events`.
    ListEvents(String),
    /// `get_event`.
    GetEvent(EventId),
}

impl ProviderCall {
    /// Returns `true` when the call targets the volume `id` or searches for
    /// `label`.
    #[must_use]
    pub fn concerns(&self, id: &VolumeId, label: &str) -> bool {
        match self {
            Self::FindVolumes(filter) => filter.label.as_deref() == Some(label),
            Self::CreateVolume(spec) => spec.label == label,
            Self::DeleteVolume(target)
            | Self::AttachVolume(target, _)
            | Self::DetachVolume(target)
            | Self::GetVolume(target) => target == id,
            Self::ListEvents(entity) => entity == id.as_str(),
            Self::ListInstances(_) | Self::InstanceAddresses(_) | Self::GetEvent(_) => false,
        }
    }
}

#[derive(Debug)]
struct Pending {
    volume_id: VolumeId,
    event_id: EventId,
    owner: Option<NodeId>,
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct State {
    volumes: Vec<Volume>,
    nodes: Vec<(Node, Vec<IpAddr>)>,
    events: Vec<LifecycleEvent>,
    pending: Vec<Pending>,
    calls: Vec<ProviderCall>,
    failures: Vec<(String, ProviderError)>,
    attach_delay: Delay,
    detach_delay: Delay,
    next_id: u64,
    device_root: Option<Utf8PathBuf>,
    withhold_devices: bool,
    fault: Option<ProviderError>,
}

impl State {
    fn take_failure(&mut self, operation: &str) -> Result<(), ProviderError> {
        match self
            .failures
            .iter()
            .position(|(name, _)| name == operation)
        {
            Some(index) => Err(self.failures.remove(index).1),
            None => Ok(()),
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        1000 + self.next_id
    }

    fn volume_mut(&mut self, id: &VolumeId, operation: &str) -> Result<&mut Volume, ProviderError> {
        self.volumes
            .iter_mut()
            .find(|volume| &volume.id == id)
            .ok_or_else(|| ProviderError::with_status(operation, 404, "Not found"))
    }

    fn device_for(&self, label: &str) -> Utf8PathBuf {
        let name = format!("scsi-0Linode_Volume_{label}");
        self.device_root.as_ref().map_or_else(
            || Utf8PathBuf::from("/dev/disk/by-id").join(&name),
            |root| root.join(&name),
        )
    }

    /// Creates the device stand-in. A failure is kept and surfaced as the
    /// result of the provider call in progress, or of the next one.
    fn materialise(&mut self, device: &Utf8Path) {
        if self.device_root.is_none() || self.withhold_devices {
            return;
        }
        if let Err(err) = std::fs::File::create(device) {
            self.fault = Some(ProviderError::new(
                "device_stand_in",
                format!("failed to create {device}: {err}"),
            ));
        }
    }

    fn push_event(&mut self, volume_id: &VolumeId, action: EventAction, status: EventStatus) -> EventId {
        let id = EventId::new(self.next_id().to_string());
        self.events.push(LifecycleEvent {
            id: id.clone(),
            action,
            status,
            entity_type: EntityKind::Volume.as_str().to_owned(),
            entity_id: volume_id.as_str().to_owned(),
            created: String::from(CREATED),
        });
        id
    }

    fn begin(&mut self, volume_id: &VolumeId, action: EventAction, owner: Option<NodeId>, delay: Delay) -> EventId {
        let event_id = self.push_event(volume_id, action, EventStatus::Started);
        let remaining = match delay {
            Delay::Ticks(ticks) => Some(ticks),
            Delay::Never => None,
        };
        self.pending.push(Pending {
            volume_id: volume_id.clone(),
            event_id: event_id.clone(),
            owner,
            remaining,
        });
        if remaining == Some(0) {
            self.tick_by(0);
        }
        event_id
    }

    fn tick(&mut self) {
        self.tick_by(1);
    }

    fn tick_by(&mut self, step: u32) {
        let mut due = Vec::new();
        self.pending.retain_mut(|pending| match pending.remaining.as_mut() {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(step);
                if *remaining == 0 {
                    due.push((
                        pending.volume_id.clone(),
                        pending.event_id.clone(),
                        pending.owner.clone(),
                    ));
                    false
                } else {
                    true
                }
            }
            None => true,
        });
        for (volume_id, event_id, owner) in due {
            self.apply(&volume_id, &event_id, owner);
        }
    }

    fn apply(&mut self, volume_id: &VolumeId, event_id: &EventId, owner: Option<NodeId>) {
        let device = self
            .volumes
            .iter()
            .find(|volume| &volume.id == volume_id)
            .map(|volume| self.device_for(&volume.label));
        if let (Some(device), true) = (device.as_ref(), owner.is_some()) {
            self.materialise(device);
        }
        if let Some(volume) = self.volumes.iter_mut().find(|volume| &volume.id == volume_id) {
            volume.device_path = owner.as_ref().and(device);
            volume.owner = owner;
        }
        if let Some(event) = self.events.iter_mut().find(|event| &event.id == event_id) {
            event.status = EventStatus::Finished;
        }
    }

    fn is_transitioning(&self, volume_id: &VolumeId) -> bool {
        self.pending.iter().any(|pending| &pending.volume_id == volume_id)
    }
}

/// In-memory [`Provider`] with eventually consistent ownership.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<State>>,
}

impl FakeProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places device paths under `root` and creates a stand-in file there
    /// whenever a volume becomes attached.
    #[must_use]
    pub fn with_device_root(self, root: &Utf8Path) -> Self {
        self.lock().device_root = Some(root.to_path_buf());
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|err| panic!("fake provider lock poisoned: {err}"))
    }

    /// Seeds a volume. Owned volumes without a device path get one.
    pub fn insert_volume(&self, mut volume: Volume) -> VolumeId {
        let mut state = self.lock();
        if volume.owner.is_some() && volume.device_path.is_none() {
            let device = state.device_for(&volume.label);
            state.materialise(&device);
            volume.device_path = Some(device);
        }
        let id = volume.id.clone();
        state.volumes.push(volume);
        id
    }

    /// Seeds an instance and its addresses.
    pub fn insert_node(&self, node: Node, addresses: Vec<IpAddr>) {
        self.lock().nodes.push((node, addresses));
    }

    /// Appends an event for `volume_id` without changing ownership.
    pub fn push_event(&self, volume_id: &VolumeId, action: EventAction, status: EventStatus) -> EventId {
        self.lock().push_event(volume_id, action, status)
    }

    /// Starts an ownership change that the code under test did not request.
    pub fn begin_transition(&self, volume_id: &VolumeId, transition: Transition) -> EventId {
        self.lock().begin(
            volume_id,
            transition.action,
            transition.owner,
            transition.delay,
        )
    }

    /// Sets how long requested attaches take to become visible.
    pub fn set_attach_delay(&self, delay: Delay) {
        self.lock().attach_delay = delay;
    }

    /// Sets how long requested detaches take to become visible.
    pub fn set_detach_delay(&self, delay: Delay) {
        self.lock().detach_delay = delay;
    }

    /// Stops creating device stand-ins, so device waits time out.
    pub fn withhold_devices(&self) {
        self.lock().withhold_devices = true;
    }

    /// Makes the next call to `operation` fail with `status` and `message`.
    pub fn fail_next(&self, operation: &str, status: u16, message: &str) {
        self.lock().failures.push((
            operation.to_owned(),
            ProviderError::with_status(operation, status, message),
        ));
    }

    /// Returns the current record of `id`.
    ///
    /// # Panics
    ///
    /// Panics when no such volume exists.
    #[must_use]
    pub fn volume(&self, id: &VolumeId) -> Volume {
        self.lock()
            .volumes
            .iter()
            .find(|volume| &volume.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("volume {id} does not exist"))
    }

    /// Returns every stored volume.
    #[must_use]
    pub fn volumes(&self) -> Vec<Volume> {
        self.lock().volumes.clone()
    }

    /// Returns every recorded call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Returns recorded attach requests.
    #[must_use]
    pub fn attach_calls(&self) -> Vec<(VolumeId, NodeId)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::AttachVolume(volume, node) => Some((volume, node)),
                _ => None,
            })
            .collect()
    }

    /// Returns recorded detach requests.
    #[must_use]
    pub fn detach_calls(&self) -> Vec<VolumeId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::DetachVolume(volume) => Some(volume),
                _ => None,
            })
            .collect()
    }

    /// Returns recorded create requests.
    #[must_use]
    pub fn create_calls(&self) -> Vec<VolumeSpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::CreateVolume(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Returns recorded delete requests.
    #[must_use]
    pub fn delete_calls(&self) -> Vec<VolumeId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::DeleteVolume(volume) => Some(volume),
                _ => None,
            })
            .collect()
    }

    /// Returns how many times `get_event` was called.
    #[must_use]
    pub fn get_event_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ProviderCall::GetEvent(_)))
            .count()
    }

    fn respond<T: Send + 'static>(
        &self,
        call: ProviderCall,
        operation: &str,
        handler: impl FnOnce(&mut State) -> Result<T, ProviderError>,
    ) -> ProviderFuture<'static, T> {
        let result = {
            let mut state = self.lock();
            state.calls.push(call);
            let outcome = state
                .take_failure(operation)
                .and_then(|()| handler(&mut state));
            match state.fault.take() {
                Some(fault) => Err(fault),
                None => outcome,
            }
        };
        Box::pin(async move { result })
    }
}

impl Provider for FakeProvider {
    fn find_volumes<'a>(&'a self, filter: &'a VolumeFilter) -> ProviderFuture<'a, Vec<Volume>> {
        self.respond(
            ProviderCall::FindVolumes(filter.clone()),
            "find_volumes",
            |state| {
                // Label filtering is loose on purpose; callers must re-check.
                Ok(state
                    .volumes
                    .iter()
                    .filter(|volume| {
                        filter
                            .label
                            .as_deref()
                            .is_none_or(|label| volume.label.starts_with(label))
                            && filter
                                .region
                                .as_deref()
                                .is_none_or(|region| volume.region == region)
                    })
                    .cloned()
                    .collect())
            },
        )
    }

    fn create_volume<'a>(&'a self, spec: &'a VolumeSpec) -> ProviderFuture<'a, Volume> {
        self.respond(
            ProviderCall::CreateVolume(spec.clone()),
            "create_volume",
            |state| {
                let volume = Volume {
                    id: VolumeId::new(state.next_id().to_string()),
                    label: spec.label.clone(),
                    region: spec.region.clone(),
                    size_bytes: spec.size_bytes.unwrap_or(20 * GIB),
                    owner: None,
                    device_path: None,
                    tags: spec.tags.clone(),
                    created: Some(String::from(CREATED)),
                };
                state.volumes.push(volume.clone());
                Ok(volume)
            },
        )
    }

    fn delete_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ()> {
        self.respond(ProviderCall::DeleteVolume(id.clone()), "delete_volume", |state| {
            let volume = state.volume_mut(id, "delete_volume")?;
            if volume.owner.is_some() {
                return Err(ProviderError::with_status(
                    "delete_volume",
                    400,
                    "Volume is attached",
                ));
            }
            state.volumes.retain(|volume| &volume.id != id);
            Ok(())
        })
    }

    fn attach_volume<'a>(&'a self, id: &'a VolumeId, node: &'a NodeId) -> ProviderFuture<'a, ()> {
        self.respond(
            ProviderCall::AttachVolume(id.clone(), node.clone()),
            "attach_volume",
            |state| {
                let attached = state.volume_mut(id, "attach_volume")?.owner.is_some();
                if attached || state.is_transitioning(id) {
                    return Err(ProviderError::with_status(
                        "attach_volume",
                        400,
                        "Volume is already attached or busy",
                    ));
                }
                let delay = state.attach_delay;
                state.begin(id, EventAction::Attach, Some(node.clone()), delay);
                Ok(())
            },
        )
    }

    fn detach_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ()> {
        self.respond(ProviderCall::DetachVolume(id.clone()), "detach_volume", |state| {
            let attached = state.volume_mut(id, "detach_volume")?.owner.is_some();
            if !attached || state.is_transitioning(id) {
                return Err(ProviderError::with_status(
                    "detach_volume",
                    400,
                    "Volume is not attached or busy",
                ));
            }
            let delay = state.detach_delay;
            state.begin(id, EventAction::Detach, None, delay);
            Ok(())
        })
    }

    fn get_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, Volume> {
        self.respond(ProviderCall::GetVolume(id.clone()), "get_volume", |state| {
            state.tick();
            state.volume_mut(id, "get_volume").map(|volume| volume.clone())
        })
    }

    fn list_instances<'a>(&'a self, label: Option<&'a str>) -> ProviderFuture<'a, Vec<Node>> {
        self.respond(
            ProviderCall::ListInstances(label.map(str::to_owned)),
            "list_instances",
            |state| {
                Ok(state
                    .nodes
                    .iter()
                    .map(|(node, _)| node)
                    .filter(|node| label.is_none_or(|label| node.label.starts_with(label)))
                    .cloned()
                    .collect())
            },
        )
    }

    fn instance_addresses<'a>(&'a self, node: &'a NodeId) -> ProviderFuture<'a, Vec<IpAddr>> {
        self.respond(
            ProviderCall::InstanceAddresses(node.clone()),
            "instance_addresses",
            |state| {
                state
                    .nodes
                    .iter()
                    .find(|(candidate, _)| &candidate.id == node)
                    .map(|(_, addresses)| addresses.clone())
                    .ok_or_else(|| ProviderError::with_status("instance_addresses", 404, "Not found"))
            },
        )
    }

    fn list_events<'a>(
        &'a self,
        kind: EntityKind,
        entity_id: &'a str,
    ) -> ProviderFuture<'a, Vec<LifecycleEvent>> {
        self.respond(
            ProviderCall::ListEvents(entity_id.to_owned()),
            "list_events",
            |state| {
                Ok(state
                    .events
                    .iter()
                    .rev()
                    .filter(|event| event.entity_type == kind.as_str() && event.entity_id == entity_id)
                    .cloned()
                    .collect())
            },
        )
    }

    fn get_event<'a>(&'a self, id: &'a EventId) -> ProviderFuture<'a, LifecycleEvent> {
        self.respond(ProviderCall::GetEvent(id.clone()), "get_event", |state| {
            state.tick();
            state
                .events
                .iter()
                .find(|event| &event.id == id)
                .cloned()
                .ok_or_else(|| ProviderError::with_status("get_event", 404, "Not found"))
        })
    }
}

/// Host tool invocation recorded by [`ScriptedTools`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ToolCall {
    /// `format(device, fs_type)`.
    Format(Utf8PathBuf, String),
    /// `mount(device, target)`.
    Mount(Utf8PathBuf, Utf8PathBuf),
    /// `unmount(target)`.
    Unmount(Utf8PathBuf),
    /// `detect_filesystem(device)`.
    DetectFilesystem(Utf8PathBuf),
}

#[derive(Debug, Default)]
struct ToolState {
    filesystems: BTreeMap<Utf8PathBuf, String>,
    mounts: BTreeMap<Utf8PathBuf, Utf8PathBuf>,
    calls: Vec<ToolCall>,
    failures: Vec<(String, LocalToolError)>,
}

impl ToolState {
    fn take_failure(&mut self, operation: &str) -> Result<(), LocalToolError> {
        match self
            .failures
            .iter()
            .position(|(name, _)| name == operation)
        {
            Some(index) => Err(self.failures.remove(index).1),
            None => Ok(()),
        }
    }
}

/// In-memory [`LocalTools`] that tracks formatted devices and mounts.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTools {
    state: Arc<Mutex<ToolState>>,
}

impl ScriptedTools {
    /// Creates tools with no formatted devices and no mounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ToolState> {
        self.state
            .lock()
            .unwrap_or_else(|err| panic!("scripted tools lock poisoned: {err}"))
    }

    /// Marks `device` as already carrying `fs_type`.
    pub fn seed_filesystem(&self, device: &Utf8Path, fs_type: &str) {
        self.lock()
            .filesystems
            .insert(device.to_path_buf(), fs_type.to_owned());
    }

    /// Makes the next call to `operation` fail with exit status 32.
    pub fn fail_next(&self, operation: &str) {
        self.lock().failures.push((
            operation.to_owned(),
            LocalToolError {
                program: operation.to_owned(),
                operation: operation.to_owned(),
                status: Some(32),
                output: String::from("simulated failure"),
            },
        ));
    }

    /// Returns every recorded invocation in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ToolCall> {
        self.lock().calls.clone()
    }

    /// Returns recorded format invocations.
    #[must_use]
    pub fn format_calls(&self) -> Vec<(Utf8PathBuf, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ToolCall::Format(device, fs_type) => Some((device, fs_type)),
                _ => None,
            })
            .collect()
    }

    /// Returns recorded mount invocations.
    #[must_use]
    pub fn mount_calls(&self) -> Vec<(Utf8PathBuf, Utf8PathBuf)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ToolCall::Mount(device, target) => Some((device, target)),
                _ => None,
            })
            .collect()
    }

    /// Returns recorded unmount invocations.
    #[must_use]
    pub fn unmount_calls(&self) -> Vec<Utf8PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ToolCall::Unmount(target) => Some(target),
                _ => None,
            })
            .collect()
    }

    /// Returns the filesystem on `device`, if any.
    #[must_use]
    pub fn filesystem_on(&self, device: &Utf8Path) -> Option<String> {
        self.lock().filesystems.get(device).cloned()
    }

    /// Returns `true` when `target` is mounted.
    #[must_use]
    pub fn is_mounted_at(&self, target: &Utf8Path) -> bool {
        self.lock().mounts.contains_key(target)
    }
}

impl LocalTools for ScriptedTools {
    fn format(&self, device: &Utf8Path, fs_type: &str) -> Result<(), LocalToolError> {
        let mut state = self.lock();
        state
            .calls
            .push(ToolCall::Format(device.to_path_buf(), fs_type.to_owned()));
        state.take_failure("format")?;
        state
            .filesystems
            .insert(device.to_path_buf(), fs_type.to_owned());
        Ok(())
    }

    fn mount(&self, device: &Utf8Path, target: &Utf8Path) -> Result<(), LocalToolError> {
        let mut state = self.lock();
        state
            .calls
            .push(ToolCall::Mount(device.to_path_buf(), target.to_path_buf()));
        state.take_failure("mount")?;
        state
            .mounts
            .insert(target.to_path_buf(), device.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), LocalToolError> {
        let mut state = self.lock();
        state.calls.push(ToolCall::Unmount(target.to_path_buf()));
        state.take_failure("unmount")?;
        state.mounts.remove(target);
        Ok(())
    }

    fn detect_filesystem(&self, device: &Utf8Path) -> Result<Option<String>, LocalToolError> {
        let mut state = self.lock();
        state
            .calls
            .push(ToolCall::DetectFilesystem(device.to_path_buf()));
        state.take_failure("detect_filesystem")?;
        Ok(state.filesystems.get(device).cloned())
    }

    fn is_mounted(&self, target: &Utf8Path) -> Result<bool, LocalToolError> {
        let mut state = self.lock();
        state.take_failure("is_mounted")?;
        Ok(state.mounts.contains_key(target))
    }
}
