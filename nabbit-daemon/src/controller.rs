//! Daemon aggregate
//!
//! The controller holds everything the daemon coordinates:
//! - the robot state and its transitions
//! - the playback queue
//! - connected clients and their event subscriptions
//! - the interactive owner
//! - info animations and ear rest positions
//!
//! It never awaits. Lines for clients go to each connection's outbox, and
//! the caller performs the hardware side of transitions. The daemon keeps
//! it behind one lock.

use std::collections::{BTreeMap, VecDeque};

use nabbit_core::state::{Event, RobotState};
use nabbit_protocol::{
    encode_line, event_matches, Animation, EventMessage, Packet, Response, StateMessage,
    DEFAULT_INTERACTIVE_EVENTS,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lines waiting to be written to one client
pub type Outbox = mpsc::UnboundedSender<String>;

/// Identifies a client connection for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl core::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Connection {
    outbox: Outbox,
    /// Subscriptions outside interactive mode
    events: Vec<String>,
}

struct Owner {
    id: ConnectionId,
    events: Vec<String>,
}

/// A request waiting in the playback queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRequest {
    pub origin: ConnectionId,
    pub request_id: Option<String>,
    pub packet: Packet,
}

impl QueuedRequest {
    fn is_sleep(&self) -> bool {
        matches!(self.packet, Packet::Sleep)
    }
}

/// What the drain worker does next
#[derive(Debug, Clone, PartialEq)]
pub enum DrainStep {
    /// Nothing to do until notified
    Wait,
    /// Idle with info animations to show
    Info(Vec<Animation>),
    /// Past its expiration: answer `expired`, never play
    Expired(QueuedRequest),
    Run(QueuedRequest),
    /// The queue ran empty after playback
    Drained,
}

/// Result of a `cancel` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Canceled,
    NotCancelable,
    NotPlaying,
}

struct Playing {
    request_id: Option<String>,
    cancelable: bool,
    canceled: bool,
}

pub struct Controller {
    state: RobotState,
    queue: VecDeque<QueuedRequest>,
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: u64,
    owner: Option<Owner>,
    /// Info animations by id, oldest first
    infos: Vec<(String, Animation)>,
    rest_ears: (u8, u8),
    playing: Option<Playing>,
}

impl Controller {
    pub fn new(rest_ears: (u8, u8)) -> Self {
        Self {
            state: RobotState::Idle,
            queue: VecDeque::new(),
            connections: BTreeMap::new(),
            next_id: 0,
            owner: None,
            infos: Vec::new(),
            rest_ears,
            playing: None,
        }
    }

    pub fn state(&self) -> RobotState {
        self.state
    }

    /// Change state, broadcasting it when it differs
    pub fn set_state(&mut self, state: RobotState) -> bool {
        if state == self.state {
            return false;
        }
        info!("State {} -> {}", self.state, state);
        self.state = state;
        self.broadcast_state();
        true
    }

    /// State an event leads to, if it changes anything
    pub fn next_state(&self, event: Event) -> Option<RobotState> {
        let next = self.state.transition(event);
        (next != self.state).then_some(next)
    }

    // ---- Connections ----

    /// Register a client and send it the current state
    pub fn connect(&mut self, outbox: Outbox) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.connections.insert(
            id,
            Connection {
                outbox,
                events: Vec::new(),
            },
        );
        self.send(id, &StateMessage::new(self.state));
        id
    }

    /// Forget a client; returns whether it owned interactive mode
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        self.connections.remove(&id);
        self.release_owner(id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Subscriptions used outside interactive mode
    pub fn set_idle_events(&mut self, id: ConnectionId, events: Vec<String>) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.events = events;
        }
    }

    pub fn owner(&self) -> Option<ConnectionId> {
        self.owner.as_ref().map(|owner| owner.id)
    }

    /// Make `id` the interactive owner; `None` events means the defaults
    pub fn enter_interactive(&mut self, id: ConnectionId, events: Option<Vec<String>>) {
        self.owner = Some(Owner {
            id,
            events: events.unwrap_or_else(default_interactive_events),
        });
    }

    /// Replace the owner's subscriptions; returns false if `id` is not the owner
    pub fn set_owner_events(&mut self, id: ConnectionId, events: Option<Vec<String>>) -> bool {
        match &mut self.owner {
            Some(owner) if owner.id == id => {
                owner.events = events.unwrap_or_else(default_interactive_events);
                true
            }
            _ => false,
        }
    }

    /// Drop interactive ownership held by `id`
    pub fn release_owner(&mut self, id: ConnectionId) -> bool {
        if self.owner() == Some(id) {
            self.owner = None;
            true
        } else {
            false
        }
    }

    // ---- Queue ----

    pub fn enqueue(&mut self, request: QueuedRequest) {
        debug!("Queued {} from {}", request.packet.kind(), request.origin);
        self.queue.push_back(request);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Pick the drain worker's next step
    ///
    /// A `sleep` goes back to the tail while anything else is queued, so it
    /// only runs once it is alone. Interactive requests whose connection is
    /// gone are dropped.
    pub fn next_step(&mut self) -> DrainStep {
        if !self.state.can_drain() {
            return DrainStep::Wait;
        }
        loop {
            let Some(request) = self.queue.pop_front() else {
                return if self.state == RobotState::Playing {
                    DrainStep::Drained
                } else if self.infos.is_empty() {
                    DrainStep::Wait
                } else {
                    DrainStep::Info(self.infos.iter().map(|(_, a)| a.clone()).collect())
                };
            };
            if request.packet.expiration().is_some_and(|e| e.is_past()) {
                return DrainStep::Expired(request);
            }
            if request.is_sleep() && self.queue.iter().any(|other| !other.is_sleep()) {
                self.queue.push_back(request);
                continue;
            }
            if matches!(request.packet, Packet::Mode { .. }) && !self.is_connected(request.origin) {
                debug!("Dropped interactive request of closed {}", request.origin);
                continue;
            }
            return DrainStep::Run(request);
        }
    }

    // ---- Idle ambience ----

    /// Add, replace or (with `None`) remove an info animation
    pub fn set_info(&mut self, info_id: String, animation: Option<Animation>) {
        let existing = self.infos.iter().position(|(id, _)| *id == info_id);
        match (existing, animation) {
            (Some(at), Some(animation)) => self.infos[at].1 = animation,
            (None, Some(animation)) => self.infos.push((info_id, animation)),
            (Some(at), None) => {
                self.infos.remove(at);
            }
            (None, None) => {}
        }
    }

    pub fn info_count(&self) -> usize {
        self.infos.len()
    }

    pub fn rest_ears(&self) -> (u8, u8) {
        self.rest_ears
    }

    pub fn set_rest_ears(&mut self, left: Option<u8>, right: Option<u8>) {
        if let Some(left) = left {
            self.rest_ears.0 = left;
        }
        if let Some(right) = right {
            self.rest_ears.1 = right;
        }
    }

    // ---- Playback ----

    pub fn begin_playing(&mut self, request_id: Option<String>, cancelable: bool) {
        self.playing = Some(Playing {
            request_id,
            cancelable,
            canceled: false,
        });
    }

    /// Clear the playing request; returns whether it was canceled
    pub fn end_playing(&mut self) -> bool {
        self.playing.take().is_some_and(|playing| playing.canceled)
    }

    /// Cancel the playing request if it is `request_id`
    pub fn cancel_request(&mut self, request_id: &str) -> CancelOutcome {
        match &mut self.playing {
            Some(playing) if playing.request_id.as_deref() == Some(request_id) => {
                if playing.cancelable {
                    playing.canceled = true;
                    CancelOutcome::Canceled
                } else {
                    CancelOutcome::NotCancelable
                }
            }
            _ => CancelOutcome::NotPlaying,
        }
    }

    /// Whether a button click cancels the playing request
    ///
    /// Clicks belong to an interactive owner subscribed to the button.
    /// Marks the request canceled when they do.
    pub fn click_cancels(&mut self) -> bool {
        let owner_wants_button = self
            .owner
            .as_ref()
            .is_some_and(|owner| event_matches("button", &owner.events));
        match &mut self.playing {
            Some(playing) if playing.cancelable && !owner_wants_button => {
                playing.canceled = true;
                true
            }
            _ => false,
        }
    }

    // ---- Outgoing lines ----

    /// Queue a message on one connection
    pub fn send<T: Serialize>(&self, to: ConnectionId, message: &T) {
        let Some(connection) = self.connections.get(&to) else {
            return;
        };
        match encode_line(message) {
            Ok(line) => {
                let _ = connection.outbox.send(line);
            }
            Err(e) => warn!("Cannot encode message for {}: {}", to, e),
        }
    }

    pub fn respond(&self, to: ConnectionId, response: &Response) {
        self.send(to, response);
    }

    /// Send the state to every client
    pub fn broadcast_state(&self) {
        let message = StateMessage::new(self.state);
        for id in self.connections.keys() {
            self.send(*id, &message);
        }
    }

    /// Send an event to subscribers
    ///
    /// With an interactive owner, only the owner gets events, filtered by
    /// its interactive subscriptions.
    pub fn broadcast_event(&self, event: &EventMessage) {
        let category = event.category();
        match &self.owner {
            Some(owner) => {
                if event_matches(&category, &owner.events) {
                    debug!("Event {} to owner {}", category, owner.id);
                    self.send(owner.id, event);
                }
            }
            None => {
                debug!("Broadcast event {}", category);
                for (id, connection) in &self.connections {
                    if event_matches(&category, &connection.events) {
                        self.send(*id, event);
                    }
                }
            }
        }
    }
}

fn default_interactive_events() -> Vec<String> {
    DEFAULT_INTERACTIVE_EVENTS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nabbit_core::button::ButtonEvent;
    use nabbit_protocol::{Expiration, SequenceItem};
    use serde_json::Value;

    fn fire(ctrl: &mut Controller, event: Event) -> Option<RobotState> {
        let next = ctrl.next_state(event)?;
        ctrl.set_state(next);
        Some(next)
    }

    fn client(ctrl: &mut Controller) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = ctrl.connect(tx);
        // Initial state line
        assert!(rx.try_recv().unwrap().contains("\"state\""));
        (id, rx)
    }

    fn lines(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            assert!(line.ends_with("\r\n"));
            out.push(serde_json::from_str(line.trim_end()).unwrap());
        }
        out
    }

    fn command(origin: ConnectionId, id: &str) -> QueuedRequest {
        QueuedRequest {
            origin,
            request_id: Some(id.to_string()),
            packet: Packet::Command {
                sequence: vec![SequenceItem::default()],
                expiration: None,
                cancelable: true,
            },
        }
    }

    fn sleep(origin: ConnectionId) -> QueuedRequest {
        QueuedRequest {
            origin,
            request_id: None,
            packet: Packet::Sleep,
        }
    }

    fn run_id(step: DrainStep) -> Option<String> {
        match step {
            DrainStep::Run(request) => request.request_id,
            other => panic!("expected a request, got {:?}", other),
        }
    }

    #[test]
    fn test_fifo_and_drained() {
        let mut ctrl = Controller::new((0, 0));
        let (a, _) = client(&mut ctrl);
        let (b, _) = client(&mut ctrl);
        ctrl.enqueue(command(a, "1"));
        ctrl.enqueue(command(b, "2"));
        ctrl.enqueue(command(a, "3"));

        assert_eq!(run_id(ctrl.next_step()).as_deref(), Some("1"));
        assert_eq!(fire(&mut ctrl, Event::BeginPlayback), Some(RobotState::Playing));
        assert_eq!(run_id(ctrl.next_step()).as_deref(), Some("2"));
        assert_eq!(run_id(ctrl.next_step()).as_deref(), Some("3"));
        assert_eq!(ctrl.next_step(), DrainStep::Drained);
        assert_eq!(fire(&mut ctrl, Event::QueueDrained), Some(RobotState::Idle));
        assert_eq!(ctrl.next_step(), DrainStep::Wait);
    }

    #[test]
    fn test_expired_request() {
        let mut ctrl = Controller::new((0, 0));
        let (a, _) = client(&mut ctrl);
        let mut late = command(a, "late");
        late.packet = Packet::Command {
            sequence: vec![],
            expiration: Some(Expiration::at(chrono::Utc::now() - chrono::Duration::seconds(5))),
            cancelable: true,
        };
        ctrl.enqueue(late);
        ctrl.enqueue(command(a, "2"));
        assert!(matches!(ctrl.next_step(), DrainStep::Expired(r) if r.request_id.as_deref() == Some("late")));
        assert_eq!(run_id(ctrl.next_step()).as_deref(), Some("2"));
    }

    #[test]
    fn test_sleep_waits_for_other_requests() {
        let mut ctrl = Controller::new((0, 0));
        let (a, _) = client(&mut ctrl);
        ctrl.enqueue(sleep(a));
        ctrl.enqueue(command(a, "1"));
        ctrl.enqueue(sleep(a));
        ctrl.enqueue(command(a, "2"));

        assert_eq!(run_id(ctrl.next_step()).as_deref(), Some("1"));
        fire(&mut ctrl, Event::BeginPlayback);
        assert_eq!(run_id(ctrl.next_step()).as_deref(), Some("2"));
        // Only sleeps are left
        assert!(matches!(ctrl.next_step(), DrainStep::Run(r) if r.is_sleep()));
        assert_eq!(fire(&mut ctrl, Event::Sleep), Some(RobotState::Asleep));
        assert_eq!(ctrl.queue_len(), 1);
        assert_eq!(ctrl.next_step(), DrainStep::Wait);
    }

    #[test]
    fn test_interactive_request_of_closed_connection_dropped() {
        let mut ctrl = Controller::new((0, 0));
        let (a, _) = client(&mut ctrl);
        let (b, _) = client(&mut ctrl);
        ctrl.enqueue(QueuedRequest {
            origin: a,
            request_id: None,
            packet: Packet::Mode {
                mode: nabbit_protocol::Mode::Interactive,
                events: None,
            },
        });
        ctrl.enqueue(command(b, "1"));
        ctrl.disconnect(a);
        assert_eq!(run_id(ctrl.next_step()).as_deref(), Some("1"));
    }

    #[test]
    fn test_info_upsert_and_remove() {
        let mut ctrl = Controller::new((0, 0));
        let animation = |tempo| Animation { tempo, colors: vec![] };
        ctrl.set_info("weather".into(), Some(animation(1.0)));
        ctrl.set_info("clock".into(), Some(animation(2.0)));
        ctrl.set_info("weather".into(), Some(animation(3.0)));
        assert_eq!(ctrl.info_count(), 2);
        match ctrl.next_step() {
            DrainStep::Info(infos) => {
                assert_eq!(infos.iter().map(|a| a.tempo).collect::<Vec<_>>(), vec![3.0, 2.0]);
            }
            other => panic!("expected infos, got {:?}", other),
        }
        ctrl.set_info("weather".into(), None);
        ctrl.set_info("absent".into(), None);
        assert_eq!(ctrl.info_count(), 1);
    }

    #[test]
    fn test_state_broadcast_to_all() {
        let mut ctrl = Controller::new((0, 0));
        let (_, mut rx1) = client(&mut ctrl);
        let (_, mut rx2) = client(&mut ctrl);
        assert!(!ctrl.set_state(RobotState::Idle));
        assert!(ctrl.set_state(RobotState::Asleep));
        for rx in [&mut rx1, &mut rx2] {
            let got = lines(rx);
            assert_eq!(got.len(), 1);
            assert_eq!(got[0]["type"], "state");
            assert_eq!(got[0]["state"], "asleep");
        }
    }

    #[test]
    fn test_event_routing() {
        let mut ctrl = Controller::new((0, 0));
        let (a, mut rx_a) = client(&mut ctrl);
        let (b, mut rx_b) = client(&mut ctrl);
        ctrl.set_idle_events(a, vec!["button".into()]);
        ctrl.set_idle_events(b, vec!["ears".into(), "rfid/*".into()]);

        ctrl.broadcast_event(&EventMessage::button(ButtonEvent::Click, 1.0));
        ctrl.broadcast_event(&EventMessage::ears(1, 2, 1.0));
        assert_eq!(lines(&mut rx_a).len(), 1);
        assert_eq!(lines(&mut rx_b)[0]["type"], "ears_event");

        // The owner gets everything it asked for, others nothing
        ctrl.enter_interactive(b, None);
        ctrl.broadcast_event(&EventMessage::button(ButtonEvent::Click, 2.0));
        assert!(lines(&mut rx_a).is_empty());
        assert_eq!(lines(&mut rx_b)[0]["event"], "click");

        assert!(ctrl.set_owner_events(b, Some(vec!["ears".into()])));
        assert!(!ctrl.set_owner_events(a, None));
        ctrl.broadcast_event(&EventMessage::button(ButtonEvent::Click, 3.0));
        assert!(lines(&mut rx_b).is_empty());

        assert!(ctrl.disconnect(b));
        assert_eq!(ctrl.owner(), None);
        ctrl.broadcast_event(&EventMessage::button(ButtonEvent::Up, 4.0));
        assert_eq!(lines(&mut rx_a)[0]["event"], "up");
    }

    #[test]
    fn test_cancel_outcomes() {
        let mut ctrl = Controller::new((0, 0));
        assert_eq!(ctrl.cancel_request("1"), CancelOutcome::NotPlaying);

        ctrl.begin_playing(Some("1".into()), false);
        assert_eq!(ctrl.cancel_request("1"), CancelOutcome::NotCancelable);
        assert_eq!(ctrl.cancel_request("2"), CancelOutcome::NotPlaying);
        assert!(!ctrl.click_cancels());
        assert!(!ctrl.end_playing());

        ctrl.begin_playing(Some("3".into()), true);
        assert_eq!(ctrl.cancel_request("3"), CancelOutcome::Canceled);
        assert!(ctrl.end_playing());
    }

    #[test]
    fn test_click_belongs_to_button_owner() {
        let mut ctrl = Controller::new((0, 0));
        let (a, _) = client(&mut ctrl);
        ctrl.enter_interactive(a, Some(vec!["button".into()]));
        ctrl.begin_playing(None, true);
        assert!(!ctrl.click_cancels());

        ctrl.set_owner_events(a, Some(vec![]));
        assert!(ctrl.click_cancels());
        assert!(ctrl.end_playing());
    }

    #[test]
    fn test_rest_ears() {
        let mut ctrl = Controller::new((0, 0));
        ctrl.set_rest_ears(Some(5), None);
        assert_eq!(ctrl.rest_ears(), (5, 0));
        ctrl.set_rest_ears(None, Some(12));
        assert_eq!(ctrl.rest_ears(), (5, 12));
    }
}
