use std::{collections::BTreeMap, time::Duration};

use thiserror::Error;
use tokio::time::{sleep_until, Instant};

use crate::{
    bus::Subscription,
    events::{EventKind, IncomingEvent},
    protocol::{
        ids::{CorrelationId, DeviceId, DeviceUniqueId},
        messages::{Envelope, FcuToAcPayload},
        state::DeviceState,
    },
    transport::{TransmitError, Transport},
};


#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown device {name:?}")]
pub struct LookupError {
    pub name: String
}

#[derive(Error, Debug)]
pub enum CorrelateError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("failed to transmit command: {0}")]
    Transmit(#[from] TransmitError),
}


/// Device name to unique id mapping.
#[derive(Clone, Debug, Default)]
pub struct DeviceDirectory {
    by_name: BTreeMap<String, DeviceUniqueId>,
}

impl DeviceDirectory {
    pub fn new(by_name: BTreeMap<String, DeviceUniqueId>) -> Self {
        Self { by_name }
    }

    /// Resolve every name, or fail on the first unknown one.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<DeviceUniqueId>, LookupError> {
        names.iter()
            .map(|name| {
                let name = name.as_ref();
                self.by_name.get(name)
                    .cloned()
                    .ok_or_else(|| LookupError { name: name.to_string() })
            })
            .collect()
    }

    pub fn name_of(&self, id: &DeviceUniqueId) -> Option<&str> {
        self.by_name.iter()
            .find(|(_, candidate)| *candidate == id)
            .map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceUniqueId)> {
        self.by_name.iter().map(|(name, id)| (name.as_str(), id))
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl FromIterator<(String, DeviceUniqueId)> for DeviceDirectory {
    fn from_iter<I: IntoIterator<Item = (String, DeviceUniqueId)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}


fn unique(targets: impl IntoIterator<Item = DeviceUniqueId>) -> Vec<DeviceUniqueId> {
    let mut unique = Vec::new();
    for target in targets {
        if !unique.contains(&target) {
            unique.push(target);
        }
    }
    unique
}


/// A state delta addressed to a set of units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingCommand {
    pub targets: Vec<DeviceUniqueId>,
    pub correlation_id: CorrelationId,
    pub state: DeviceState,
}

impl OutgoingCommand {
    /// A command with a fresh random correlation id. Repeated targets are dropped.
    pub fn new(targets: impl IntoIterator<Item = DeviceUniqueId>, state: DeviceState) -> Self {
        Self {
            targets: unique(targets),
            correlation_id: CorrelationId::random(),
            state,
        }
    }

    pub fn to_envelope(&self, source: &DeviceId) -> Result<Envelope, TransmitError> {
        let payload = FcuToAcPayload { data: self.state.to_hex() };

        Ok(Envelope::pack(source, self.correlation_id.clone(), &unique(self.targets.iter().cloned()), &payload)?)
    }

    /// Whether `event` confirms this command: a state report carrying our correlation id.
    pub fn is_confirmed_by(&self, event: &IncomingEvent) -> bool {
        event.message_id == self.correlation_id
            && matches!(event.kind, EventKind::DeviceStateReport(_))
    }
}


/// How a correlation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Every target confirmed.
    Complete,
    DeadlineElapsed,
    /// The transport went away before every target confirmed.
    StreamClosed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationResult {
    /// Confirmed targets, in arrival order.
    pub confirmed: Vec<DeviceUniqueId>,

    /// Targets that did not confirm, in target order.
    pub outstanding: Vec<DeviceUniqueId>,

    /// Sources that confirmed our correlation id without being targeted, in arrival order.
    pub unexpected: Vec<DeviceUniqueId>,

    /// The state each confirming unit reported.
    pub reported: BTreeMap<DeviceUniqueId, DeviceState>,

    pub termination: Termination,
}

impl CorrelationResult {
    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn timed_out(&self) -> bool {
        self.termination == Termination::DeadlineElapsed
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Observation {
    Ignored,
    Confirmed,
    Duplicate,
    Unexpected,
}

/// Confirmation bookkeeping for one command.
struct Tracker {
    outstanding: Vec<DeviceUniqueId>,
    confirmed: Vec<DeviceUniqueId>,
    unexpected: Vec<DeviceUniqueId>,
    reported: BTreeMap<DeviceUniqueId, DeviceState>,
}

impl Tracker {
    fn new(targets: &[DeviceUniqueId]) -> Self {
        Self {
            outstanding: unique(targets.iter().cloned()),
            confirmed: Vec::new(),
            unexpected: Vec::new(),
            reported: BTreeMap::new(),
        }
    }

    fn observe(&mut self, command: &OutgoingCommand, event: &IncomingEvent) -> Observation {
        if !command.is_confirmed_by(event) {
            return Observation::Ignored
        }

        let source = &event.source_id;

        if let Some(state) = event.device_state() {
            self.reported.insert(source.clone(), *state);
        }

        if let Some(idx) = self.outstanding.iter().position(|id| id == source) {
            let id = self.outstanding.remove(idx);
            self.confirmed.push(id);
            Observation::Confirmed
        } else if self.confirmed.contains(source) || self.unexpected.contains(source) {
            Observation::Duplicate
        } else {
            self.unexpected.push(source.clone());
            Observation::Unexpected
        }
    }

    fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    fn finish(self, termination: Termination) -> CorrelationResult {
        CorrelationResult {
            confirmed: self.confirmed,
            outstanding: self.outstanding,
            unexpected: self.unexpected,
            reported: self.reported,
            termination,
        }
    }
}


/// A command with its event subscription already in place, ready to transmit.
///
/// The only way to obtain an [InFlight] correlation is [Pending::transmit], so the
/// subscription always predates the transmission.
pub struct Pending<'t, T: ?Sized> {
    transport: &'t T,
    command: OutgoingCommand,
    subscription: Subscription,
}

impl<'t, T: Transport + ?Sized> Pending<'t, T> {
    pub fn new(transport: &'t T, command: OutgoingCommand) -> Self {
        Self {
            subscription: transport.subscribe(),
            transport,
            command,
        }
    }

    pub fn command(&self) -> &OutgoingCommand {
        &self.command
    }

    /// Send the command. A transmit failure drops the subscription without waiting.
    ///
    /// A command without targets is not sent at all.
    pub async fn transmit(self) -> Result<InFlight, TransmitError> {
        if self.command.targets.is_empty() {
            tracing::debug!(message_id = %self.command.correlation_id, "no targets, nothing sent");
        } else {
            let envelope = self.command.to_envelope(self.transport.client_id())?;

            self.transport.send(envelope).await?;

            tracing::debug!(message_id = %self.command.correlation_id, targets = self.command.targets.len(), "command sent");
        }

        Ok(InFlight {
            tracker: Tracker::new(&self.command.targets),
            command: self.command,
            subscription: self.subscription,
        })
    }
}

/// A transmitted command awaiting confirmations. Dropping it stops waiting.
pub struct InFlight {
    command: OutgoingCommand,
    subscription: Subscription,
    tracker: Tracker,
}

impl InFlight {
    pub fn command(&self) -> &OutgoingCommand {
        &self.command
    }

    /// Collect confirmations until every target confirmed, `deadline` elapses, or the
    /// event stream ends.
    pub async fn wait(self, deadline: Duration) -> CorrelationResult {
        self.wait_until(Instant::now() + deadline).await
    }

    /// As [InFlight::wait], with the deadline as an instant.
    pub async fn wait_until(mut self, deadline: Instant) -> CorrelationResult {
        let sleep = sleep_until(deadline);
        tokio::pin!(sleep);

        let termination = loop {
            if self.tracker.is_complete() {
                break Termination::Complete
            }

            let event = tokio::select! {
                _ = &mut sleep => break Termination::DeadlineElapsed,
                event = self.subscription.recv() => event,
            };

            let Some(event) = event else {
                break Termination::StreamClosed
            };

            let source = &event.source_id;

            match self.tracker.observe(&self.command, &event) {
                Observation::Ignored => {},
                Observation::Confirmed => {
                    tracing::info!(device = %source, message_id = %event.message_id, "confirmed");
                },
                Observation::Duplicate => {
                    tracing::warn!(device = %source, message_id = %event.message_id, "duplicate confirmation ignored");
                },
                Observation::Unexpected => {
                    tracing::warn!(device = %source, message_id = %event.message_id, "confirmation from a device that was not targeted");
                },
            }
        };

        if termination != Termination::Complete {
            tracing::debug!(message_id = %self.command.correlation_id, outstanding = self.tracker.outstanding.len(), ?termination, "correlation ended early");
        }

        self.tracker.finish(termination)
    }
}


/// Send `command` and gather its confirmations.
///
/// `deadline` covers the transmission as well: a send still blocked when it elapses is
/// abandoned and every target is reported outstanding.
pub async fn correlate<T: Transport + ?Sized>(transport: &T, command: OutgoingCommand, deadline: Duration) -> Result<CorrelationResult, TransmitError> {
    let deadline = Instant::now() + deadline;
    let targets = command.targets.clone();

    let in_flight = tokio::select! {
        in_flight = Pending::new(transport, command).transmit() => in_flight?,
        _ = sleep_until(deadline) => {
            tracing::warn!(targets = targets.len(), "deadline elapsed while sending");
            return Ok(Tracker::new(&targets).finish(Termination::DeadlineElapsed))
        }
    };

    Ok(in_flight.wait_until(deadline).await)
}


/// Sends state deltas to units by name.
pub struct CommandCorrelator<T> {
    transport: T,
    directory: DeviceDirectory,
}

impl<T: Transport> CommandCorrelator<T> {
    pub fn new(transport: T, directory: DeviceDirectory) -> Self {
        Self { transport, directory }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn directory(&self) -> &DeviceDirectory {
        &self.directory
    }

    /// Resolve `names`, send `state` to all of them and wait up to `deadline`.
    ///
    /// Nothing is sent if any name is unknown.
    pub async fn apply<S: AsRef<str>>(&self, names: &[S], state: DeviceState, deadline: Duration) -> Result<CorrelationResult, CorrelateError> {
        let targets = self.directory.resolve(names)?;
        let command = OutgoingCommand::new(targets, state);

        Ok(correlate(&self.transport, command, deadline).await?)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::{bus::EventBus, protocol::types::*};

    use super::*;

    /// Publishes the scripted confirmations from inside `send`, before it returns.
    struct EagerTransport {
        client_id: DeviceId,
        bus: EventBus,
        responders: Vec<&'static str>,
        sent: Mutex<Vec<Envelope>>,
        fail: bool,
        send_delay: Duration,
    }

    impl EagerTransport {
        fn new(responders: Vec<&'static str>) -> Self {
            Self {
                client_id: DeviceId::new("mobile-1"),
                bus: EventBus::new(),
                responders,
                sent: Mutex::new(Vec::new()),
                fail: false,
                send_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Transport for EagerTransport {
        fn client_id(&self) -> &DeviceId {
            &self.client_id
        }

        fn subscribe(&self) -> Subscription {
            self.bus.subscribe()
        }

        async fn send(&self, envelope: Envelope) -> Result<(), TransmitError> {
            if self.fail {
                return Err(TransmitError::Closed)
            }

            tokio::time::sleep(self.send_delay).await;

            for source in &self.responders {
                self.bus.publish(report(source, envelope.message_id.clone()));
            }

            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    fn report(source: &str, message_id: CorrelationId) -> IncomingEvent {
        IncomingEvent {
            source_id: DeviceUniqueId::new(source),
            message_id,
            target_ids: vec![DeviceId::new("mobile-1")],
            timestamp: String::new(),
            kind: EventKind::DeviceStateReport(DeviceState { status: Some(AcStatus::Off), ..Default::default() }),
        }
    }

    fn ids(ids: &[&str]) -> Vec<DeviceUniqueId> {
        ids.iter().map(|id| DeviceUniqueId::new(*id)).collect()
    }

    fn turn_off() -> DeviceState {
        DeviceState { status: Some(AcStatus::Off), ..Default::default() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmations_racing_the_send_are_seen() {
        let transport = EagerTransport::new(vec!["ac-2", "ac-1"]);
        let command = OutgoingCommand::new(ids(&["ac-1", "ac-2"]), turn_off());

        let result = correlate(&transport, command, Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.confirmed, ids(&["ac-2", "ac-1"]));
        assert!(result.outstanding.is_empty());
        assert_eq!(result.termination, Termination::Complete);
        assert_eq!(result.reported[&DeviceUniqueId::new("ac-1")].status, Some(AcStatus::Off));
    }

    #[tokio::test(start_paused = true)]
    async fn test_envelope_sent() {
        let transport = EagerTransport::new(vec!["ac-1"]);
        let command = OutgoingCommand::new(ids(&["ac-1", "ac-1"]), turn_off());
        let correlation_id = command.correlation_id.clone();

        correlate(&transport, command, Duration::from_secs(5)).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].cmd, "CMD_FCU_TO_AC");
        assert_eq!(sent[0].message_id, correlation_id);
        assert_eq!(sent[0].target_id, vec!["ac-1".to_string()]);
        assert_eq!(sent[0].source_id, "mobile-1");
        assert_eq!(sent[0].payload["data"], turn_off().to_hex());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_gives_partial_result() {
        let transport = EagerTransport::new(vec!["ac-3", "ac-1"]);
        let command = OutgoingCommand::new(ids(&["ac-1", "ac-2", "ac-3"]), turn_off());

        let started = tokio::time::Instant::now();
        let result = correlate(&transport, command, Duration::from_secs(10)).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
        assert_eq!(result.confirmed, ids(&["ac-3", "ac-1"]));
        assert_eq!(result.outstanding, ids(&["ac-2"]));
        assert!(result.timed_out());
        assert!(!result.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_and_strangers() {
        let transport = EagerTransport::new(vec!["ac-1", "ac-9", "ac-1", "ac-9", "ac-2"]);
        let command = OutgoingCommand::new(ids(&["ac-1", "ac-2"]), turn_off());

        let result = correlate(&transport, command, Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.confirmed, ids(&["ac-1", "ac-2"]));
        assert_eq!(result.unexpected, ids(&["ac-9"]));
        assert!(result.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_correlation_ids_ignored() {
        let transport = EagerTransport::new(vec![]);
        let command = OutgoingCommand::new(ids(&["ac-1"]), turn_off());
        let correlation_id = command.correlation_id.clone();

        let in_flight = Pending::new(&transport, command).transmit().await.unwrap();

        transport.bus.publish(report("ac-1", CorrelationId::new("someone-else")));
        transport.bus.publish(IncomingEvent {
            kind: EventKind::Heartbeat(Default::default()),
            ..report("ac-1", correlation_id.clone())
        });

        let result = in_flight.wait(Duration::from_secs(1)).await;
        assert!(result.confirmed.is_empty());
        assert_eq!(result.outstanding, ids(&["ac-1"]));
        assert!(result.timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_targets_completes_immediately() {
        let transport = EagerTransport::new(vec![]);
        let command = OutgoingCommand::new(vec![], turn_off());

        let result = correlate(&transport, command, Duration::from_secs(60)).await.unwrap();
        assert_eq!(result.termination, Termination::Complete);
        assert!(result.confirmed.is_empty() && result.outstanding.is_empty());
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_targets_confirm_once() {
        let transport = EagerTransport::new(vec!["ac-1", "ac-1"]);
        let command = OutgoingCommand {
            targets: ids(&["ac-1", "ac-1", "ac-2"]),
            correlation_id: CorrelationId::new("m-1"),
            state: turn_off(),
        };

        let result = correlate(&transport, command, Duration::from_secs(1)).await.unwrap();

        assert_eq!(result.confirmed, ids(&["ac-1"]));
        assert_eq!(result.outstanding, ids(&["ac-2"]));
        assert_eq!(transport.sent.lock().unwrap()[0].target_id, vec!["ac-1".to_string(), "ac-2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_send_counts_against_deadline() {
        let mut transport = EagerTransport::new(vec!["ac-1"]);
        transport.send_delay = Duration::from_secs(5);

        let command = OutgoingCommand::new(ids(&["ac-1"]), turn_off());

        let started = tokio::time::Instant::now();
        let result = correlate(&transport, command, Duration::from_secs(1)).await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2), "{elapsed:?}");
        assert_eq!(result.termination, Termination::DeadlineElapsed);
        assert_eq!(result.outstanding, ids(&["ac-1"]));
        assert!(result.confirmed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gets_what_the_send_left_over() {
        let mut transport = EagerTransport::new(vec!["ac-1"]);
        transport.send_delay = Duration::from_millis(700);

        let command = OutgoingCommand::new(ids(&["ac-1", "ac-2"]), turn_off());

        let started = tokio::time::Instant::now();
        let result = correlate(&transport, command, Duration::from_secs(1)).await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_millis(1100), "{elapsed:?}");
        assert_eq!(result.confirmed, ids(&["ac-1"]));
        assert_eq!(result.outstanding, ids(&["ac-2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_closed() {
        let transport = EagerTransport::new(vec!["ac-1"]);
        let command = OutgoingCommand::new(ids(&["ac-1", "ac-2"]), turn_off());

        let in_flight = Pending::new(&transport, command).transmit().await.unwrap();
        transport.bus.close();

        let result = in_flight.wait(Duration::from_secs(60)).await;
        assert_eq!(result.confirmed, ids(&["ac-1"]));
        assert_eq!(result.termination, Termination::StreamClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_failure_aborts() {
        let mut transport = EagerTransport::new(vec!["ac-1"]);
        transport.fail = true;

        let command = OutgoingCommand::new(ids(&["ac-1"]), turn_off());
        let err = correlate(&transport, command, Duration::from_secs(60)).await.unwrap_err();

        assert!(matches!(err, TransmitError::Closed));
        assert_eq!(transport.bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_name_sends_nothing() {
        let directory: DeviceDirectory = [
            ("living".to_string(), DeviceUniqueId::new("ac-1")),
        ].into_iter().collect();

        let correlator = CommandCorrelator::new(EagerTransport::new(vec!["ac-1"]), directory);

        let err = correlator.apply(&["living", "garage"], turn_off(), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, CorrelateError::Lookup(LookupError { ref name }) if name == "garage"));
        assert!(correlator.transport().sent.lock().unwrap().is_empty());

        let result = correlator.apply(&["living"], turn_off(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.confirmed, ids(&["ac-1"]));
        assert_eq!(correlator.directory().name_of(&result.confirmed[0]), Some("living"));
    }
}
