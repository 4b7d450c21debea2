//! The nabbitd daemon
//!
//! [`Nabbitd`] turns client packets and hardware events into controller
//! updates and facade calls. Connection tasks call [`Nabbitd::handle`],
//! the hardware task calls [`Nabbitd::on_hardware_event`], and the drain
//! task plays the queue through [`Nabbitd::run_queued`].
//!
//! The stage lock serializes state transitions with queue processing, so
//! the LED and ear effects of one transition never interleave with another.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nabbit_core::button::ButtonEvent;
use nabbit_core::ears::EarId;
use nabbit_core::state::{Event, RobotState};
use nabbit_core::tag::{TagFlags, TagSnapshot, TagTechnology, Uid};
use nabbit_core::traits::{Led, Rgb, LED_COUNT};
use nabbit_protocol::{
    now_timestamp, Animation, ErrorClass, EventMessage, Mode, Packet, Request, Response, RfidEvent,
    Status,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{MutexGuard, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channels::HardwareEvent;
use crate::config::{self, DaemonConfig};
use crate::controller::{CancelOutcome, ConnectionId, Controller, DrainStep, Outbox, QueuedRequest};
use crate::nabio::NabIo;
use crate::resources::ResourceLocator;

/// Services whose `config-update` reloads our configuration
const CONFIG_SERVICES: [&str; 2] = ["nabd", "nabbitd"];

pub struct Nabbitd {
    controller: Mutex<Controller>,
    /// Wakes the drain task after every queue or state change
    wake: Notify,
    nabio: NabIo,
    config: RwLock<DaemonConfig>,
    config_path: Option<PathBuf>,
    started: Instant,
    stage: tokio::sync::Mutex<()>,
    /// Debounce of hand-moved ears
    ears_moved: Mutex<Option<JoinHandle<()>>>,
    /// Stops the drain task ahead of a halt
    drain_stop: CancellationToken,
    /// Stops everything
    shutdown: CancellationToken,
}

impl Nabbitd {
    pub fn new(
        nabio: NabIo,
        config: DaemonConfig,
        config_path: Option<PathBuf>,
        shutdown: CancellationToken,
    ) -> Self {
        let rest = config.daemon.init_ear_position;
        Self {
            controller: Mutex::new(Controller::new((rest, rest))),
            wake: Notify::new(),
            nabio,
            config: RwLock::new(config),
            config_path,
            started: Instant::now(),
            stage: tokio::sync::Mutex::new(()),
            ears_moved: Mutex::new(None),
            drain_stop: shutdown.child_token(),
            shutdown,
        }
    }

    pub fn nabio(&self) -> &NabIo {
        &self.nabio
    }

    pub fn state(&self) -> RobotState {
        self.controller.lock().state()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn drain_token(&self) -> &CancellationToken {
        &self.drain_stop
    }

    pub fn info_loop_ms(&self) -> u32 {
        self.config.read().daemon.info_loop_ms
    }

    // ---- Connections ----

    pub fn connect(&self, outbox: Outbox) -> ConnectionId {
        let id = self.controller.lock().connect(outbox);
        info!("Connection {} opened", id);
        id
    }

    /// Forget a connection, leaving interactive mode if it owned it
    pub async fn disconnect(&self, id: ConnectionId) {
        let was_owner = self.controller.lock().disconnect(id);
        info!("Connection {} closed", id);
        if was_owner {
            self.dispatch(Event::ExitInteractive).await;
        }
    }

    /// Answer a line that did not make a request
    pub fn reject(&self, to: ConnectionId, response: Response) {
        self.controller.lock().respond(to, &response);
    }

    fn respond(&self, to: ConnectionId, response: Response, request_id: Option<String>) {
        self.controller
            .lock()
            .respond(to, &response.with_request_id(request_id));
    }

    fn enqueue(&self, request: QueuedRequest) {
        self.controller.lock().enqueue(request);
        self.wake.notify_one();
    }

    /// Queue a request unless the current state runs it at once
    fn enqueue_unless(
        &self,
        request: QueuedRequest,
        direct: impl FnOnce(RobotState) -> bool,
    ) -> Option<QueuedRequest> {
        let mut ctrl = self.controller.lock();
        if direct(ctrl.state()) {
            return Some(request);
        }
        ctrl.enqueue(request);
        drop(ctrl);
        self.wake.notify_one();
        None
    }

    // ---- State ----

    pub(crate) async fn lock_stage(&self) -> MutexGuard<'_, ()> {
        self.stage.lock().await
    }

    /// Resolve on the next queue or state change
    pub(crate) async fn woken(&self) {
        self.wake.notified().await;
    }

    /// Feed a state machine event, with the stage lock held
    ///
    /// Entering idle brings the ears back to rest; falling asleep turns the
    /// LEDs off and parks the ears. The new state is broadcast after its
    /// effects.
    pub(crate) async fn fire(&self, event: Event) {
        let next = self.controller.lock().next_state(event);
        let Some(next) = next else {
            return;
        };
        match next {
            RobotState::Idle => self.idle_setup().await,
            RobotState::Asleep => self.sleep_setup().await,
            RobotState::Interactive | RobotState::Playing => {}
        }
        self.controller.lock().set_state(next);
    }

    /// Feed a state machine event from outside the drain task
    pub async fn dispatch(&self, event: Event) {
        let _stage = self.lock_stage().await;
        self.fire(event).await;
        self.wake.notify_one();
    }

    pub(crate) async fn idle_setup(&self) {
        let (left, right) = self.controller.lock().rest_ears();
        self.nabio.move_ears_with_leds(Rgb::FUCHSIA, left, right).await;
        self.nabio.pulse(Led::Bottom, Rgb::FUCHSIA);
    }

    async fn sleep_setup(&self) {
        let position = self.config.read().daemon.sleep_ear_position;
        self.nabio.set_leds([Rgb::OFF; LED_COUNT]);
        self.nabio.move_ears(position, position).await;
    }

    // ---- Client packets ----

    /// Service one request from a connection
    pub async fn handle(self: &Arc<Self>, from: ConnectionId, request: Request) {
        let Request { request_id, packet } = request;
        debug!("{} from {}", packet.kind(), from);
        match packet {
            Packet::Info { info_id, animation } => self.on_info(from, request_id, info_id, animation),
            Packet::Ears { left, right, event } => {
                self.on_ears(from, request_id, left, right, event).await
            }
            packet @ (Packet::Command { .. } | Packet::Message { .. }) => {
                self.on_perform(from, request_id, packet)
            }
            Packet::Cancel => self.on_cancel(from, request_id).await,
            Packet::Wakeup => {
                self.respond(from, Response::ok(), request_id);
                if self.state() == RobotState::Asleep {
                    self.dispatch(Event::Wakeup).await;
                }
            }
            Packet::Sleep => {
                let request = QueuedRequest {
                    origin: from,
                    request_id,
                    packet: Packet::Sleep,
                };
                if let Some(request) = self.enqueue_unless(request, |s| s == RobotState::Asleep) {
                    self.respond(from, Response::ok(), request.request_id);
                }
            }
            Packet::Mode { mode: Mode::Interactive, events } => {
                self.on_interactive(from, request_id, events)
            }
            Packet::Mode { mode: Mode::Idle, events } => {
                self.controller
                    .lock()
                    .set_idle_events(from, events.unwrap_or_default());
                let was_owner = self.controller.lock().release_owner(from);
                if was_owner {
                    self.dispatch(Event::ExitInteractive).await;
                }
                self.respond(from, Response::ok(), request_id);
            }
            Packet::Gestalt => {
                let response = self.gestalt();
                self.respond(from, response, request_id);
            }
            packet @ (Packet::Test { .. } | Packet::RfidWrite { .. }) => {
                let request = QueuedRequest {
                    origin: from,
                    request_id,
                    packet,
                };
                if let Some(request) = self.enqueue_unless(request, |s| s.runs_direct()) {
                    self.run_direct(request).await;
                }
            }
            Packet::ConfigUpdate { service, slot } => {
                if CONFIG_SERVICES.contains(&service.as_str()) && slot.as_deref() == Some("locale") {
                    self.reload_config().await;
                }
                self.respond(from, Response::ok(), request_id);
            }
            Packet::Shutdown { reboot } => {
                self.respond(from, Response::ok(), request_id);
                let daemon = self.clone();
                tokio::spawn(async move { daemon.shutdown(reboot).await });
            }
        }
    }

    fn on_info(
        &self,
        from: ConnectionId,
        request_id: Option<String>,
        info_id: String,
        animation: Option<Animation>,
    ) {
        self.controller.lock().set_info(info_id, animation);
        self.respond(from, Response::ok(), request_id);
        self.wake.notify_one();
    }

    async fn on_ears(
        &self,
        from: ConnectionId,
        request_id: Option<String>,
        left: Option<u8>,
        right: Option<u8>,
        event: bool,
    ) {
        let (state, (left, right)) = {
            let mut ctrl = self.controller.lock();
            ctrl.set_rest_ears(left, right);
            (ctrl.state(), ctrl.rest_ears())
        };
        if state == RobotState::Idle {
            if event {
                self.controller
                    .lock()
                    .broadcast_event(&EventMessage::ears(left, right, now_timestamp()));
            }
            self.nabio.move_ears(left, right).await;
        }
        self.respond(from, Response::ok(), request_id);
    }

    /// Play at once for the interactive owner, queue for everyone else
    fn on_perform(self: &Arc<Self>, from: ConnectionId, request_id: Option<String>, packet: Packet) {
        let request = QueuedRequest {
            origin: from,
            request_id,
            packet,
        };
        let is_owner = self.controller.lock().owner() == Some(from);
        if is_owner {
            let daemon = self.clone();
            tokio::spawn(async move { daemon.perform(request).await });
        } else {
            self.enqueue(request);
        }
    }

    /// A successful cancel is answered by the `canceled` response of the
    /// request it interrupts
    async fn on_cancel(&self, from: ConnectionId, request_id: Option<String>) {
        let Some(target) = request_id.as_deref() else {
            self.respond(from, Response::malformed("Missing required request_id slot"), None);
            return;
        };
        let outcome = self.controller.lock().cancel_request(target);
        let response = match outcome {
            CancelOutcome::Canceled => {
                self.nabio.cancel(false).await;
                return;
            }
            CancelOutcome::NotCancelable => Response::error(
                ErrorClass::NotCancelable.as_str(),
                "Playing command is not cancelable",
            ),
            CancelOutcome::NotPlaying => Response::error(
                ErrorClass::NotPlaying.as_str(),
                "Cancel packet does not refer to running command",
            ),
        };
        self.respond(from, response, request_id);
    }

    fn on_interactive(&self, from: ConnectionId, request_id: Option<String>, events: Option<Vec<String>>) {
        let mut ctrl = self.controller.lock();
        if ctrl.set_owner_events(from, events.clone()) {
            ctrl.respond(from, &Response::ok().with_request_id(request_id));
        } else if ctrl.owner().is_some() {
            let response = Response::error(
                ErrorClass::AlreadyInInteractiveMode.as_str(),
                "nabbitd is already in interactive mode",
            );
            ctrl.respond(from, &response.with_request_id(request_id));
        } else {
            ctrl.enqueue(QueuedRequest {
                origin: from,
                request_id,
                packet: Packet::Mode {
                    mode: Mode::Interactive,
                    events,
                },
            });
            drop(ctrl);
            self.wake.notify_one();
        }
    }

    fn gestalt(&self) -> Response {
        let hardware = serde_json::to_value(self.nabio.gestalt()).unwrap_or_default();
        let ctrl = self.controller.lock();
        Response::ok()
            .with_field("state", ctrl.state().as_str())
            .with_field("connections", ctrl.connection_count())
            .with_field("uptime", self.started.elapsed().as_secs())
            .with_field("hardware", hardware)
    }

    // ---- Queue ----

    pub(crate) fn next_step(&self) -> DrainStep {
        self.controller.lock().next_step()
    }

    /// Loop an info animation; returns `true` when woken early
    pub(crate) async fn play_info(&self, animation: &Animation, loop_ms: u32) -> bool {
        self.nabio.play_info(animation, loop_ms, &self.wake).await
    }

    pub(crate) fn expire(&self, request: QueuedRequest) {
        debug!("{} {:?} expired", request.packet.kind(), request.request_id);
        self.respond(request.origin, Response::new(Status::Expired), request.request_id);
    }

    /// Run a request taken from the queue, with the stage lock held
    pub(crate) async fn run_queued(&self, request: QueuedRequest) {
        match &request.packet {
            Packet::Command { .. } | Packet::Message { .. } => {
                self.fire(Event::BeginPlayback).await;
                self.perform(request).await;
            }
            Packet::Sleep => {
                self.respond(request.origin, Response::ok(), request.request_id);
                self.fire(Event::Sleep).await;
            }
            Packet::Mode { events, .. } => {
                {
                    let mut ctrl = self.controller.lock();
                    ctrl.enter_interactive(request.origin, events.clone());
                    ctrl.respond(
                        request.origin,
                        &Response::ok().with_request_id(request.request_id.clone()),
                    );
                }
                self.fire(Event::EnterInteractive).await;
            }
            Packet::Test { .. } => {
                self.fire(Event::BeginPlayback).await;
                self.run_direct(request).await;
            }
            Packet::RfidWrite { .. } => self.run_direct(request).await,
            other => warn!("Unexpected queued {}", other.kind()),
        }
    }

    async fn run_direct(&self, request: QueuedRequest) {
        let QueuedRequest {
            origin,
            request_id,
            packet,
        } = request;
        let response = match packet {
            Packet::Test { test } => {
                if self.nabio.test(&test).await {
                    Response::ok()
                } else {
                    Response::new(Status::Failure)
                }
            }
            Packet::RfidWrite {
                tech,
                uid,
                picture,
                app,
                data,
                timeout,
            } => {
                self.rfid_write(tech, &uid, picture, app, data.as_deref().unwrap_or(""), timeout)
                    .await
            }
            other => {
                warn!("{} cannot run directly", other.kind());
                return;
            }
        };
        self.respond(origin, response, request_id);
    }

    async fn perform(&self, request: QueuedRequest) {
        let QueuedRequest {
            origin,
            request_id,
            packet,
        } = request;
        self.controller
            .lock()
            .begin_playing(request_id.clone(), packet.cancelable());
        match &packet {
            Packet::Command { sequence, .. } => self.nabio.play_sequence(sequence).await,
            Packet::Message { signature, body, .. } => {
                self.nabio.play_message(signature.as_ref(), body).await
            }
            other => warn!("Cannot perform {}", other.kind()),
        }
        let canceled = self.controller.lock().end_playing();
        let status = if canceled { Status::Canceled } else { Status::Ok };
        self.respond(origin, Response::new(status), request_id);
    }

    async fn rfid_write(
        &self,
        tech: TagTechnology,
        uid: &Uid,
        picture: u8,
        app: u8,
        data: &str,
        timeout: Option<f64>,
    ) -> Response {
        let Some(rfid) = self.nabio.rfid().cloned() else {
            return Response::error(
                ErrorClass::NfcException.as_str(),
                "Unknown exception while writing NFC tag",
            );
        };
        let default_timeout = self.config.read().hardware.tags.write_timeout_ms;
        let timeout = timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(Duration::from_millis(default_timeout as u64));

        info!("Writing tag {} (app {}, picture {})", uid, app, picture);
        self.nabio.rfid_awaiting_feedback();
        let written = tokio::time::timeout(
            timeout,
            rfid.write(tech, uid, picture, app, data.as_bytes()),
        )
        .await;
        let response = match written {
            Ok(Ok(true)) => Response::ok().with_field("uid", uid.to_string()),
            Ok(Ok(false)) => Response::error(
                ErrorClass::NfcWriteError.as_str(),
                format!("NFC write failed for tag (uid={})", uid),
            ),
            Ok(Err(e)) => {
                error!("Tag write failed: {}", e);
                Response::error(
                    ErrorClass::NfcException.as_str(),
                    "Unknown exception while writing NFC tag",
                )
            }
            Err(_) => {
                rfid.cancel_write();
                Response::new(Status::Timeout).with_message("NFC write timed out (NFC tag not found?)")
            }
        };
        self.nabio.rfid_done_feedback();
        response
    }

    // ---- Hardware events ----

    pub fn on_hardware_event(self: &Arc<Self>, event: HardwareEvent) {
        match event {
            HardwareEvent::Button(event, time) => self.on_button(event, time),
            HardwareEvent::EarMoved(ear) => self.on_ear_moved(ear),
            HardwareEvent::Tag(snapshot) => self.on_tag(&snapshot),
        }
    }

    fn on_button(self: &Arc<Self>, event: ButtonEvent, time: f64) {
        debug!("Button {}", event.as_str());
        if event == ButtonEvent::TripleClick {
            let daemon = self.clone();
            tokio::spawn(async move { daemon.shutdown(false).await });
            return;
        }
        let cancels = event == ButtonEvent::Click && self.controller.lock().click_cancels();
        if cancels {
            let daemon = self.clone();
            tokio::spawn(async move { daemon.nabio.cancel(true).await });
        } else {
            self.controller
                .lock()
                .broadcast_event(&EventMessage::button(event, time));
        }
    }

    /// The interactive owner hears each move; otherwise positions are
    /// detected once the ears stay still
    fn on_ear_moved(self: &Arc<Self>, ear: EarId) {
        let mut pending = self.ears_moved.lock();
        if let Some(task) = pending.take() {
            task.abort();
        }
        let has_owner = {
            let ctrl = self.controller.lock();
            if ctrl.owner().is_some() {
                ctrl.broadcast_event(&EventMessage::ear(ear, now_timestamp()));
                true
            } else {
                false
            }
        };
        if !has_owner {
            let daemon = self.clone();
            *pending = Some(tokio::spawn(async move { daemon.ears_moved().await }));
        }
    }

    async fn ears_moved(&self) {
        let debounce = Duration::from_millis(self.config.read().daemon.ear_debounce_ms as u64);
        tokio::time::sleep(debounce).await;
        if self.controller.lock().owner().is_some() {
            return;
        }
        let (left, right) = self.nabio.detect_ears_positions().await;
        let mut ctrl = self.controller.lock();
        ctrl.set_rest_ears(left, right);
        if ctrl.state() != RobotState::Asleep {
            let (left, right) = ctrl.rest_ears();
            ctrl.broadcast_event(&EventMessage::ears(left, right, now_timestamp()));
        }
    }

    fn on_tag(self: &Arc<Self>, snapshot: &TagSnapshot) {
        let event = RfidEvent::from_snapshot(snapshot, now_timestamp());
        debug!("Tag {} {}", event.uid, event.event);
        let detected = !snapshot.flags.contains(TagFlags::REMOVED);
        let state = {
            let ctrl = self.controller.lock();
            ctrl.broadcast_event(&EventMessage::RfidEvent(event));
            ctrl.state()
        };
        if detected && state != RobotState::Asleep {
            let daemon = self.clone();
            tokio::spawn(async move { daemon.nabio.rfid_detected_feedback().await });
        }
    }

    // ---- Lifecycle ----

    /// Reload the configuration file and resource locale
    pub async fn reload_config(&self) {
        match &self.config_path {
            Some(path) => match config::load(path) {
                Ok(config) => {
                    self.nabio
                        .set_locator(ResourceLocator::from_config(&config.resources));
                    *self.config.write() = config;
                    info!("Configuration reloaded from {}", path.display());
                }
                Err(e) => warn!("Cannot reload configuration: {}", e),
            },
            None => debug!("No configuration file to reload"),
        }
        self.nabio.pulse(Led::Bottom, Rgb::FUCHSIA);
    }

    /// Park the robot, run the halt or reboot command and stop the daemon
    pub async fn shutdown(&self, reboot: bool) {
        info!("Shutting down (reboot={})", reboot);
        self.drain_stop.cancel();
        self.nabio.boot_leds(0);
        let (position, command) = {
            let config = self.config.read();
            let command = if reboot {
                config.system.reboot_command.clone()
            } else {
                config.system.halt_command.clone()
            };
            (config.daemon.sleep_ear_position, command)
        };
        self.nabio.move_ears(position, position).await;
        match command {
            Some(command) => run_system_command(&command).await,
            None => info!("No system command configured, exiting"),
        }
        self.shutdown.cancel();
    }
}

async fn run_system_command(command: &[String]) {
    let Some((program, args)) = command.split_first() else {
        return;
    };
    info!("Running {}", command.join(" "));
    match tokio::process::Command::new(program).args(args).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("{} exited with {}", program, status),
        Err(e) => error!("Cannot run {}: {}", program, e),
    }
}
