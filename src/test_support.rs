//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::google::{
    ApiError, ApiFuture, ComputeApi, ComputeInstance, Firewall, Metadata, OPERATION_DONE,
    Operation,
};
use crate::ssh::{DialFuture, Dialer, SshError, SshTarget};

const FAKE_CREATION_TIMESTAMP: &str = "2024-05-01T12:00:00Z";

/// Records a single call made through [`FakeComputeApi`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ComputeCall {
    /// `instances.insert`.
    InsertInstance {
        /// Zone the instance was requested in.
        zone: String,
        /// Descriptor sent to the provider.
        instance: Box<ComputeInstance>,
    },
    /// `instances.get`.
    GetInstance {
        /// Zone probed.
        zone: String,
        /// Name or identifier looked up.
        instance: String,
    },
    /// `instances.delete`.
    DeleteInstance {
        /// Zone the delete was sent to.
        zone: String,
        /// Name or identifier deleted.
        instance: String,
    },
    /// `instances.setMetadata`.
    SetMetadata {
        /// Zone of the instance.
        zone: String,
        /// Name or identifier written to.
        instance: String,
        /// Metadata sent, including its fingerprint.
        metadata: Metadata,
    },
    /// `zoneOperations.get`.
    GetZoneOperation {
        /// Zone of the operation.
        zone: String,
        /// Operation name.
        operation: String,
    },
    /// `globalOperations.get`.
    GetGlobalOperation {
        /// Operation name.
        operation: String,
    },
    /// `firewalls.get`.
    GetFirewall {
        /// Rule name.
        name: String,
    },
    /// `firewalls.insert`.
    InsertFirewall {
        /// Rule sent to the provider.
        firewall: Firewall,
    },
    /// `regions.list`.
    ListRegions,
}

#[derive(Debug, Default)]
struct FakeState {
    instances: Vec<(String, ComputeInstance)>,
    lookup_failures: Vec<(String, String, ApiError)>,
    delete_failures: BTreeMap<String, ApiError>,
    insert_failure: Option<ApiError>,
    zone_operations: VecDeque<Result<Operation, ApiError>>,
    global_operations: VecDeque<Result<Operation, ApiError>>,
    firewall: Option<Firewall>,
    metadata_conflicts: u32,
    fingerprint_counter: u32,
    ping_status: Option<u16>,
    next_id: u64,
    calls: Vec<ComputeCall>,
}

impl FakeState {
    fn find(&self, zone: &str, instance: &str) -> Option<usize> {
        self.instances
            .iter()
            .position(|(vm_zone, vm)| vm_zone == zone && (vm.id == instance || vm.name == instance))
    }

    fn next_fingerprint(&mut self) -> String {
        self.fingerprint_counter += 1;
        format!("fp-{}", self.fingerprint_counter)
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::http(404, format!("The resource '{what}' was not found"))
}

fn pending(name: String) -> Operation {
    Operation {
        name,
        status: String::from("PENDING"),
        error: None,
    }
}

fn done(name: &str) -> Operation {
    Operation {
        name: name.to_owned(),
        status: OPERATION_DONE.to_owned(),
        error: None,
    }
}

/// In-memory [`ComputeApi`] with scripted failures and a call log.
///
/// Inserted instances become visible to later lookups with provider-style
/// addresses. Operations finish immediately unless scripted otherwise.
/// Clones share state, so a test can keep a handle while the driver owns
/// another.
#[derive(Clone, Debug, Default)]
pub struct FakeComputeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeComputeApi {
    /// Creates an empty project with no firewall rule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ComputeCall> {
        self.state().calls.clone()
    }

    /// Adds an existing instance to `zone`.
    pub fn add_instance(&self, zone: &str, instance: ComputeInstance) {
        let mut state = self.state();
        let mut stored = instance;
        if stored.metadata.is_none() {
            stored.metadata = Some(Metadata {
                fingerprint: state.next_fingerprint(),
                items: Vec::new(),
            });
        }
        state.instances.push((zone.to_owned(), stored));
    }

    /// Returns the stored copy of an instance.
    #[must_use]
    pub fn instance(&self, zone: &str, instance: &str) -> Option<ComputeInstance> {
        let state = self.state();
        state
            .find(zone, instance)
            .and_then(|index| state.instances.get(index))
            .map(|(_, vm)| vm.clone())
    }

    /// Makes every lookup of `instance` in `zone` fail with `error`.
    pub fn fail_lookup(&self, zone: &str, instance: &str, error: ApiError) {
        self.state()
            .lookup_failures
            .push((zone.to_owned(), instance.to_owned(), error));
    }

    /// Makes deleting `instance` fail with `error`.
    pub fn fail_delete(&self, instance: &str, error: ApiError) {
        self.state()
            .delete_failures
            .insert(instance.to_owned(), error);
    }

    /// Makes the next instance insert fail with `error`.
    pub fn fail_insert(&self, error: ApiError) {
        self.state().insert_failure = Some(error);
    }

    /// Queues a response for the next zone operation poll.
    pub fn push_zone_operation(&self, response: Result<Operation, ApiError>) {
        self.state().zone_operations.push_back(response);
    }

    /// Queues a response for the next global operation poll.
    pub fn push_global_operation(&self, response: Result<Operation, ApiError>) {
        self.state().global_operations.push_back(response);
    }

    /// Seeds an existing firewall rule.
    pub fn add_firewall(&self, firewall: Firewall) {
        self.state().firewall = Some(firewall);
    }

    /// Rejects the next `count` metadata writes with a fingerprint conflict,
    /// as if another writer got there first.
    pub fn conflict_metadata_writes(&self, count: u32) {
        self.state().metadata_conflicts = count;
    }

    /// Sets the status returned by region listing.
    pub fn set_ping_status(&self, status: u16) {
        self.state().ping_status = Some(status);
    }
}

impl ComputeApi for FakeComputeApi {
    fn insert_instance<'a>(
        &'a self,
        _project: &'a str,
        zone: &'a str,
        instance: &'a ComputeInstance,
    ) -> ApiFuture<'a, Operation> {
        let mut state = self.state();
        state.calls.push(ComputeCall::InsertInstance {
            zone: zone.to_owned(),
            instance: Box::new(instance.clone()),
        });
        if let Some(error) = state.insert_failure.take() {
            return Box::pin(async move { Err(error) });
        }

        state.next_id += 1;
        let id = state.next_id;
        let mut stored = instance.clone();
        stored.id = (1_000_000 + id).to_string();
        stored.status = String::from("RUNNING");
        stored.creation_timestamp = FAKE_CREATION_TIMESTAMP.to_owned();
        for nic in &mut stored.network_interfaces {
            nic.network_ip = format!("10.0.0.{id}");
            for config in &mut nic.access_configs {
                config.nat_ip = format!("34.0.0.{id}");
            }
        }
        let fingerprint = state.next_fingerprint();
        if let Some(metadata) = stored.metadata.as_mut() {
            metadata.fingerprint = fingerprint;
        }
        state.instances.push((zone.to_owned(), stored));
        Box::pin(async move { Ok(pending(format!("op-insert-{id}"))) })
    }

    fn get_instance<'a>(
        &'a self,
        _project: &'a str,
        zone: &'a str,
        instance: &'a str,
    ) -> ApiFuture<'a, ComputeInstance> {
        let mut state = self.state();
        state.calls.push(ComputeCall::GetInstance {
            zone: zone.to_owned(),
            instance: instance.to_owned(),
        });
        let failure = state
            .lookup_failures
            .iter()
            .find(|(failed_zone, failed, _)| failed_zone == zone && failed == instance)
            .map(|(_, _, error)| error.clone());
        let result = match failure {
            Some(error) => Err(error),
            None => state
                .find(zone, instance)
                .and_then(|index| state.instances.get(index))
                .map(|(_, vm)| vm.clone())
                .ok_or_else(|| not_found(instance)),
        };
        Box::pin(async move { result })
    }

    fn delete_instance<'a>(
        &'a self,
        _project: &'a str,
        zone: &'a str,
        instance: &'a str,
    ) -> ApiFuture<'a, Operation> {
        let mut state = self.state();
        state.calls.push(ComputeCall::DeleteInstance {
            zone: zone.to_owned(),
            instance: instance.to_owned(),
        });
        let result = if let Some(error) = state.delete_failures.get(instance) {
            Err(error.clone())
        } else if let Some(index) = state.find(zone, instance) {
            state.instances.remove(index);
            Ok(pending(format!("op-delete-{instance}")))
        } else {
            Err(not_found(instance))
        };
        Box::pin(async move { result })
    }

    fn set_metadata<'a>(
        &'a self,
        _project: &'a str,
        zone: &'a str,
        instance: &'a str,
        metadata: &'a Metadata,
    ) -> ApiFuture<'a, Operation> {
        let mut state = self.state();
        state.calls.push(ComputeCall::SetMetadata {
            zone: zone.to_owned(),
            instance: instance.to_owned(),
            metadata: metadata.clone(),
        });
        let result = write_metadata(&mut state, zone, instance, metadata);
        Box::pin(async move { result })
    }

    fn get_zone_operation<'a>(
        &'a self,
        _project: &'a str,
        zone: &'a str,
        operation: &'a str,
    ) -> ApiFuture<'a, Operation> {
        let mut state = self.state();
        state.calls.push(ComputeCall::GetZoneOperation {
            zone: zone.to_owned(),
            operation: operation.to_owned(),
        });
        let result = state
            .zone_operations
            .pop_front()
            .unwrap_or_else(|| Ok(done(operation)));
        Box::pin(async move { result })
    }

    fn get_global_operation<'a>(
        &'a self,
        _project: &'a str,
        operation: &'a str,
    ) -> ApiFuture<'a, Operation> {
        let mut state = self.state();
        state.calls.push(ComputeCall::GetGlobalOperation {
            operation: operation.to_owned(),
        });
        let result = state
            .global_operations
            .pop_front()
            .unwrap_or_else(|| Ok(done(operation)));
        Box::pin(async move { result })
    }

    fn get_firewall<'a>(&'a self, _project: &'a str, name: &'a str) -> ApiFuture<'a, Firewall> {
        let mut state = self.state();
        state.calls.push(ComputeCall::GetFirewall {
            name: name.to_owned(),
        });
        let result = state
            .firewall
            .clone()
            .filter(|rule| rule.name == name)
            .ok_or_else(|| not_found(name));
        Box::pin(async move { result })
    }

    fn insert_firewall<'a>(
        &'a self,
        _project: &'a str,
        firewall: &'a Firewall,
    ) -> ApiFuture<'a, Operation> {
        let mut state = self.state();
        state.calls.push(ComputeCall::InsertFirewall {
            firewall: firewall.clone(),
        });
        state.firewall = Some(firewall.clone());
        let name = format!("op-firewall-{}", firewall.name);
        Box::pin(async move { Ok(pending(name)) })
    }

    fn list_regions<'a>(&'a self, _project: &'a str) -> ApiFuture<'a, u16> {
        let mut state = self.state();
        state.calls.push(ComputeCall::ListRegions);
        let status = state.ping_status.unwrap_or(200);
        Box::pin(async move { Ok(status) })
    }
}

fn write_metadata(
    state: &mut FakeState,
    zone: &str,
    instance: &str,
    metadata: &Metadata,
) -> Result<Operation, ApiError> {
    let Some(index) = state.find(zone, instance) else {
        return Err(not_found(instance));
    };
    let conflict = ApiError::http(
        412,
        "Supplied fingerprint does not match current metadata fingerprint.",
    );
    if state.metadata_conflicts > 0 {
        state.metadata_conflicts -= 1;
        let fingerprint = state.next_fingerprint();
        if let Some((_, vm)) = state.instances.get_mut(index) {
            vm.metadata.get_or_insert_with(Metadata::default).fingerprint = fingerprint;
        }
        return Err(conflict);
    }
    let fingerprint = state.next_fingerprint();
    let Some((_, vm)) = state.instances.get_mut(index) else {
        return Err(not_found(instance));
    };
    let current = vm.metadata.get_or_insert_with(Metadata::default);
    if current.fingerprint != metadata.fingerprint {
        return Err(conflict);
    }
    *current = Metadata {
        fingerprint,
        items: metadata.items.clone(),
    };
    Ok(pending(format!("op-metadata-{instance}")))
}

/// Dialer that refuses a scripted number of attempts before connecting.
///
/// Each successful dial yields the attempt number as the session.
#[derive(Clone, Debug)]
pub struct ScriptedDialer {
    refusals: u32,
    permanent: Option<SshError>,
    attempts: Arc<AtomicU32>,
    dialled_at: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedDialer {
    /// Refuses the first `refusals` attempts, then connects.
    #[must_use]
    pub fn refusing(refusals: u32) -> Self {
        Self {
            refusals,
            permanent: None,
            attempts: Arc::new(AtomicU32::new(0)),
            dialled_at: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fails every attempt with `error`.
    #[must_use]
    pub fn failing(error: SshError) -> Self {
        Self {
            permanent: Some(error),
            ..Self::refusing(0)
        }
    }

    /// Number of dial attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Times at which each attempt started.
    #[must_use]
    pub fn dialled_at(&self) -> Vec<Instant> {
        self.dialled_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Dialer for ScriptedDialer {
    type Session = u32;

    fn dial<'a>(&'a self, target: &'a SshTarget) -> DialFuture<'a, Self::Session> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.dialled_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());
        let result = if let Some(error) = &self.permanent {
            Err(error.clone())
        } else if attempt <= self.refusals {
            Err(SshError::Connect {
                address: target.socket_address(),
                message: String::from("connection refused"),
            })
        } else {
            Ok(attempt)
        };
        Box::pin(async move { result })
    }
}
