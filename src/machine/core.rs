//! Machine core: owns the transport writer, the three command queues, the
//! parser, and the outbound event channel.
//!
//! The core is a single spawned task. External operations go through
//! [`Machine`], which mails a command plus a oneshot reply into the loop;
//! the loop selects between that mailbox, the parse-event stream, and the
//! heartbeat tick. Each command runs to completion before the next select
//! iteration, so external operations and parse-event reactions never
//! interleave and the transport has exactly one writer.

use super::events::{Event, MachineState, MachineType, Position};
use super::instructions::Instruction;
use super::transitions::{action_transition, status_transition, Action, RunState};
use crate::parser::{self, Config, ParseEvent, ParserHandle};
use std::collections::VecDeque;
use std::time::SystemTime;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Duration, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// GRBL's serial receive buffer: the serialized footprint of all in-flight
/// lines must never exceed this.
pub const MAX_BUFFER_BYTES: usize = 127;

/// Cadence of realtime status interrogation once connected.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Spacing between the stop sequence's phases, giving the firmware time to
/// honour each motion command before the next lands.
pub const STOP_STEP_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the outbound event channel. Publication awaits, so a slow
/// subscriber backpressures the core.
const EVENT_CAPACITY: usize = 10;

/// Writer half of the transport. Framing of the inbound side is an
/// upstream adapter's job; the core only ever writes.
pub type Transport = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors surfaced by [`Machine`] operations. Everything semantic travels
/// on the event stream; the only operational failure is a core that has
/// already shut down.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("machine core has shut down")]
    Closed,
}

enum Command {
    Stream {
        lines: Vec<String>,
        done: oneshot::Sender<()>,
    },
    Enqueue {
        line: String,
        done: oneshot::Sender<()>,
    },
    CurrentState {
        reply: oneshot::Sender<MachineState>,
    },
    Identification {
        reply: oneshot::Sender<Option<String>>,
    },
    RequestSettings {
        done: oneshot::Sender<()>,
    },
    ReportJobStatus {
        done: oneshot::Sender<()>,
    },
    Pause {
        done: oneshot::Sender<()>,
    },
    Resume {
        done: oneshot::Sender<()>,
    },
    StopBegin {
        reply: oneshot::Sender<bool>,
    },
    StopFinish {
        done: oneshot::Sender<()>,
    },
    Execute {
        instructions: Vec<Instruction>,
        done: oneshot::Sender<()>,
    },
    Acquire {
        timestamp: SystemTime,
        done: oneshot::Sender<()>,
    },
    SetConfig {
        config: Config,
        done: oneshot::Sender<()>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running machine core. Cloneable; all operations serialize
/// through the core's mailbox.
#[derive(Clone)]
pub struct Machine {
    commands: mpsc::Sender<Command>,
}

impl Machine {
    /// Spawns a core bound to one transport writer and one stream of framed
    /// inbound lines. Returns the handle and the outbound event receiver.
    /// On binding, the core sends a `flush` instruction so the controller
    /// starts from a clean slate.
    pub fn spawn(
        port: Transport,
        lines: mpsc::Receiver<String>,
        config: Config,
    ) -> (Machine, mpsc::Receiver<Event>) {
        let (parser, parser_events) = parser::spawn(lines, config.clone());
        let (commands_tx, commands_rx) = mpsc::channel(1);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let core = Core {
            port: Some(port),
            config,
            parser,
            parser_events,
            parser_open: true,
            commands: commands_rx,
            events: events_tx,
            heartbeat: None,
            console_queue: VecDeque::new(),
            gcode_queue: VecDeque::new(),
            buffer_queue: VecDeque::new(),
            last_run_command: String::new(),
            completed_commands: 0,
            running: false,
            stopping: false,
            connected: false,
            identification: String::new(),
            current_position: Position::default(),
            start_run_time: None,
            run_state: RunState::Running,
        };
        tokio::spawn(core.run());
        (Machine { commands: commands_tx }, events_rx)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, MachineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| MachineError::Closed)?;
        reply_rx.await.map_err(|_| MachineError::Closed)
    }

    /// Replaces the g-code queue with `lines` and starts the job: running
    /// set, completed count zeroed, start time stamped, buffer filled.
    /// A no-op once the transport is gone.
    pub async fn stream_gcode_lines(&self, lines: Vec<String>) -> Result<(), MachineError> {
        self.request(|done| Command::Stream { lines, done }).await
    }

    /// Appends one ad-hoc command to the console queue (highest priority)
    /// and fills the buffer.
    pub async fn enqueue_command(&self, line: impl Into<String>) -> Result<(), MachineError> {
        let line = line.into();
        self.request(|done| Command::Enqueue { line, done }).await
    }

    /// Deep snapshot of the job state.
    pub async fn current_state(&self) -> Result<MachineState, MachineError> {
        self.request(|reply| Command::CurrentState { reply }).await
    }

    /// The boot banner that identified the controller, while connected.
    pub async fn machine_identification(&self) -> Result<Option<String>, MachineError> {
        self.request(|reply| Command::Identification { reply }).await
    }

    /// Sends the `settings` instruction (queued `$$` dump request).
    pub async fn request_settings(&self) -> Result<(), MachineError> {
        self.request(|done| Command::RequestSettings { done }).await
    }

    /// Re-publishes the current job status on the event stream.
    pub async fn report_job_status(&self) -> Result<(), MachineError> {
        self.request(|done| Command::ReportJobStatus { done }).await
    }

    /// Realtime pause, then the pause action transition.
    pub async fn pause(&self) -> Result<(), MachineError> {
        self.request(|done| Command::Pause { done }).await
    }

    /// Realtime resume, then the resume action transition.
    pub async fn resume(&self) -> Result<(), MachineError> {
        self.request(|done| Command::Resume { done }).await
    }

    /// Aborts a running job: clears queues, pauses, flushes, resumes, then
    /// lifts/stops the spindle/parks. The waits between phases happen here,
    /// outside the core's critical section, so heartbeat and parse handling
    /// keep flowing. A no-op when no job is running.
    pub async fn stop(&self) -> Result<(), MachineError> {
        if !self.request(|reply| Command::StopBegin { reply }).await? {
            return Ok(());
        }
        time::sleep(STOP_STEP_DELAY).await;
        self.execute(vec![Instruction::Flush]).await?;
        time::sleep(STOP_STEP_DELAY).await;
        self.execute(vec![Instruction::Resume]).await?;
        time::sleep(STOP_STEP_DELAY).await;
        self.request(|done| Command::StopFinish { done }).await
    }

    /// Sends each instruction in order.
    pub async fn execute(&self, instructions: Vec<Instruction>) -> Result<(), MachineError> {
        self.request(|done| Command::Execute { instructions, done })
            .await
    }

    /// Signals a higher coordinator: if a job is running, publishes
    /// `Release` with the coordinator's timestamp.
    pub async fn acquire(&self, timestamp: SystemTime) -> Result<(), MachineError> {
        self.request(|done| Command::Acquire { timestamp, done }).await
    }

    /// Swaps the active config; the parser applies it from the next line.
    pub async fn set_config(&self, config: Config) -> Result<(), MachineError> {
        self.request(|done| Command::SetConfig { config, done }).await
    }

    /// Stops the heartbeat, closes the transport, and resets. The core
    /// stays alive to answer state queries, but nothing is sent again.
    pub async fn disconnect(&self) -> Result<(), MachineError> {
        self.request(|done| Command::Disconnect { done }).await
    }
}

struct Core {
    port: Option<Transport>,
    config: Config,
    parser: ParserHandle,
    parser_events: mpsc::Receiver<ParseEvent>,
    parser_open: bool,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<Event>,
    heartbeat: Option<Interval>,

    console_queue: VecDeque<String>,
    gcode_queue: VecDeque<String>,
    buffer_queue: VecDeque<String>,
    last_run_command: String,
    completed_commands: usize,
    running: bool,
    stopping: bool,
    connected: bool,
    identification: String,
    current_position: Position,
    start_run_time: Option<SystemTime>,
    run_state: RunState,
}

/// Resolves on the next heartbeat tick, or never while disabled.
async fn heartbeat_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl Core {
    async fn run(mut self) {
        self.send_instruction(Instruction::Flush).await;
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("machine: all handles dropped, stopping core");
                        return;
                    }
                },
                event = self.parser_events.recv(), if self.parser_open => match event {
                    Some(event) => self.handle_parse_event(event).await,
                    None => {
                        self.parser_open = false;
                        self.on_port_lost("line stream closed").await;
                    }
                },
                _ = heartbeat_tick(&mut self.heartbeat) => {
                    self.send_instruction(Instruction::Status).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Stream { lines, done } => {
                self.stream(lines).await;
                let _ = done.send(());
            }
            Command::Enqueue { line, done } => {
                self.enqueue_command(line).await;
                let _ = done.send(());
            }
            Command::CurrentState { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Identification { reply } => {
                let id = self.connected.then(|| self.identification.clone());
                let _ = reply.send(id);
            }
            Command::RequestSettings { done } => {
                self.send_instruction(Instruction::Settings).await;
                let _ = done.send(());
            }
            Command::ReportJobStatus { done } => {
                self.report_job_status().await;
                let _ = done.send(());
            }
            Command::Pause { done } => {
                self.send_instruction(Instruction::Pause).await;
                self.apply_action(Action::Pause).await;
                let _ = done.send(());
            }
            Command::Resume { done } => {
                self.send_instruction(Instruction::Resume).await;
                self.apply_action(Action::Resume).await;
                let _ = done.send(());
            }
            Command::StopBegin { reply } => {
                let began = self.stop_begin().await;
                let _ = reply.send(began);
            }
            Command::StopFinish { done } => {
                self.stop_finish().await;
                let _ = done.send(());
            }
            Command::Execute { instructions, done } => {
                for instruction in instructions {
                    self.send_instruction(instruction).await;
                }
                let _ = done.send(());
            }
            Command::Acquire { timestamp, done } => {
                if self.running {
                    self.publish(Event::Release { timestamp }).await;
                }
                let _ = done.send(());
            }
            Command::SetConfig { config, done } => {
                self.parser.set_config(config.clone()).await;
                self.config = config;
                let _ = done.send(());
            }
            Command::Disconnect { done } => {
                self.disconnect().await;
                let _ = done.send(());
            }
        }
    }

    async fn handle_parse_event(&mut self, event: ParseEvent) {
        match event {
            ParseEvent::Ok => self.on_command_processed().await,
            ParseEvent::Ready { identifier } => self.on_connected(identifier).await,
            ParseEvent::Report {
                status,
                machine_pos,
                work_pos,
            } => {
                self.on_status(&status).await;
                self.on_position(Position {
                    machine: machine_pos,
                    work: work_pos,
                })
                .await;
            }
            ParseEvent::Settings { settings } => {
                self.publish(Event::Settings { settings }).await;
            }
            ParseEvent::Alarm { message } => {
                self.publish(Event::Alarm { message }).await;
            }
            ParseEvent::Error { message } => {
                self.publish(Event::Error { message }).await;
            }
            ParseEvent::BuildInfo {
                serial_number,
                product,
                revision,
            } => {
                self.publish(Event::MachineType {
                    machine_type: MachineType { product, revision },
                })
                .await;
                self.publish(Event::SerialNumber { serial_number }).await;
            }
            ParseEvent::Unknown { data } => {
                debug!("machine: unclassified line: {}", data);
            }
        }
    }

    // --- parse-event reactions ---

    /// One line consumed by the firmware: pop it, refill, report progress,
    /// and finish the job when nothing is left.
    async fn on_command_processed(&mut self) {
        let Some(line) = self.buffer_queue.pop_front() else {
            debug!("machine: ack with empty buffer, ignoring");
            return;
        };
        self.last_run_command = line;
        self.completed_commands += 1;
        self.fill_command_buffer().await;

        if self.running && self.run_state == RunState::Running {
            self.report_job_status().await;
            if self.unprocessed_commands() == 0 {
                self.running = false;
                self.report_run_time().await;
            }
        }
    }

    async fn on_connected(&mut self, identifier: String) {
        info!("machine: controller ready: {}", identifier);
        self.identification = identifier;
        self.connected = true;
        self.start_heartbeat();
        self.send_instruction(Instruction::ReadSerialNumber).await;
        self.publish(Event::Connected).await;
    }

    async fn on_status(&mut self, status: &crate::parser::Status) {
        if self.running {
            if let Some(next) = status_transition(self.run_state, status) {
                self.transition_run_state(next).await;
            }
        }
        self.publish(Event::Status {
            status: status.clone(),
        })
        .await;
    }

    async fn on_position(&mut self, position: Position) {
        self.current_position = position;
        self.publish(Event::Position { position }).await;
    }

    // --- run-state choreography ---

    async fn apply_action(&mut self, action: Action) {
        if let Some(next) = action_transition(self.run_state, action) {
            self.transition_run_state(next).await;
        }
    }

    async fn transition_run_state(&mut self, next: RunState) {
        if self.running && self.run_state == RunState::Running {
            self.report_run_time().await;
        } else if self.running && next == RunState::Running {
            self.start_run_time = Some(SystemTime::now());
        }
        self.run_state = next;
        match next {
            RunState::Pausing | RunState::Paused | RunState::PausedDoorOpen => {
                self.paused().await;
            }
            RunState::Resuming | RunState::Running => {
                self.resumed().await;
            }
        }
    }

    async fn paused(&mut self) {
        let percent_complete = self.percent_complete();
        self.publish(Event::Paused { percent_complete }).await;
    }

    async fn resumed(&mut self) {
        self.fill_command_buffer().await;
        let percent_complete = self.percent_complete();
        self.publish(Event::Resumed { percent_complete }).await;
    }

    async fn report_run_time(&mut self) {
        if let Some(start) = self.start_run_time.take() {
            self.publish(Event::RunTime {
                start,
                end: SystemTime::now(),
            })
            .await;
        }
    }

    async fn report_job_status(&mut self) {
        if self.running {
            let run_state = self.run_state;
            self.publish(Event::RunState { run_state }).await;
            match self.run_state {
                RunState::Running | RunState::Resuming => {
                    let percent_complete = self.percent_complete();
                    self.publish(Event::Progress { percent_complete }).await;
                }
                RunState::Paused | RunState::Pausing | RunState::PausedDoorOpen => {
                    self.paused().await;
                }
            }
        } else if self.stopping {
            self.publish(Event::Stopping).await;
        } else if self.connected {
            self.publish(Event::Ready).await;
        }
    }

    // --- external operations ---

    async fn stream(&mut self, lines: Vec<String>) {
        if self.port.is_none() {
            debug!("machine: stream ignored, no transport");
            return;
        }
        info!("machine: streaming {} g-code lines", lines.len());
        self.gcode_queue = lines.into();
        self.running = true;
        self.run_state = RunState::Running;
        self.completed_commands = 0;
        self.start_run_time = Some(SystemTime::now());
        self.report_job_status().await;
        self.fill_command_buffer().await;
    }

    async fn enqueue_command(&mut self, line: String) {
        self.console_queue.push_back(line);
        self.fill_command_buffer().await;
    }

    async fn stop_begin(&mut self) -> bool {
        if !self.running {
            return false;
        }
        info!("machine: stop sequence started");
        self.stopping = true;
        self.publish(Event::Stopping).await;
        self.reset();
        self.send_instruction(Instruction::Pause).await;
        true
    }

    async fn stop_finish(&mut self) {
        self.send_instruction(Instruction::LiftToSafeHeight).await;
        self.send_instruction(Instruction::SpindleOff).await;
        self.send_instruction(Instruction::Park).await;
        self.stopping = false;
        info!("machine: stop sequence complete");
        self.report_job_status().await;
    }

    async fn disconnect(&mut self) {
        self.heartbeat = None;
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.shutdown().await {
                debug!("machine: transport close: {}", e);
            }
        }
        self.connected = false;
        self.reset();
    }

    /// Unexpected transport loss: publish the pre-reset snapshot so a
    /// supervisor can reconnect and resume at a higher layer.
    async fn on_port_lost(&mut self, note: &str) {
        if self.port.is_none() && !self.connected {
            return;
        }
        warn!("machine: transport lost: {}", note);
        self.port = None;
        self.heartbeat = None;
        self.connected = false;
        self.report_run_time().await;
        let state = self.snapshot();
        self.publish(Event::PortLost {
            state,
            note: note.to_string(),
        })
        .await;
        self.reset();
    }

    // --- instruction dispatch and flow control ---

    async fn send_instruction(&mut self, instruction: Instruction) {
        let gcode = self
            .config
            .gcode
            .get(instruction.as_str())
            .cloned()
            .unwrap_or_default();
        match instruction {
            Instruction::Flush => {
                self.reset_queues();
                self.write_raw(gcode.as_bytes()).await;
            }
            Instruction::Pause | Instruction::Resume | Instruction::Status => {
                self.write_raw(gcode.as_bytes()).await;
            }
            _ => {
                if !gcode.is_empty() {
                    self.enqueue_command(gcode).await;
                }
            }
        }
    }

    fn start_heartbeat(&mut self) {
        let mut interval =
            time::interval_at(time::Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.heartbeat = Some(interval);
    }

    /// Head of the console queue, else the g-code head while a job is
    /// actively running.
    fn next_command(&self) -> Option<String> {
        if let Some(line) = self.console_queue.front() {
            return Some(line.clone());
        }
        if self.running && self.run_state == RunState::Running {
            return self.gcode_queue.front().cloned();
        }
        None
    }

    fn dequeue_next_command(&mut self) -> Option<String> {
        if let Some(line) = self.console_queue.pop_front() {
            return Some(line);
        }
        self.gcode_queue.pop_front()
    }

    /// Serialized wire footprint: lines joined by newline plus a trailing
    /// newline. Over-counts the realtime wire by one byte; kept for
    /// firmware compatibility.
    fn room_in_buffer_for(&self, next: &str) -> bool {
        let queued: usize = self.buffer_queue.iter().map(|line| line.len() + 1).sum();
        queued + next.len() + 1 <= MAX_BUFFER_BYTES
    }

    /// Sends queued lines while the next one still fits the firmware's
    /// receive buffer. A line that can never fit is dropped, not wedged.
    async fn fill_command_buffer(&mut self) {
        while self.port.is_some() {
            let Some(next) = self.next_command() else {
                break;
            };
            if next.len() + 1 > MAX_BUFFER_BYTES {
                self.dequeue_next_command();
                warn!(
                    "machine: dropping line longer than controller buffer ({} bytes): {}",
                    next.len(),
                    next
                );
                continue;
            }
            if !self.room_in_buffer_for(&next) {
                break;
            }
            self.dequeue_next_command();
            self.buffer_queue.push_back(next.clone());
            self.send_line(&next).await;
        }
    }

    fn unprocessed_commands(&self) -> usize {
        self.console_queue.len() + self.gcode_queue.len() + self.buffer_queue.len()
    }

    fn percent_complete(&self) -> f64 {
        let total = self.completed_commands + self.unprocessed_commands();
        if total == 0 {
            return 0.0;
        }
        self.completed_commands as f64 / total as f64
    }

    async fn send_line(&mut self, line: &str) {
        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\n');
        self.write_raw(framed.as_bytes()).await;
    }

    async fn write_raw(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let Some(port) = self.port.as_mut() else {
            return;
        };
        if let Err(e) = port.write_all(bytes).await {
            let note = format!("write failed: {}", e);
            self.on_port_lost(&note).await;
        }
    }

    fn reset_queues(&mut self) {
        self.console_queue.clear();
        self.gcode_queue.clear();
        self.buffer_queue.clear();
    }

    /// Clears the job. Leaves `RunState::Running` deliberately so console
    /// commands are not gated before the next job starts.
    fn reset(&mut self) {
        self.running = false;
        self.run_state = RunState::Running;
        self.reset_queues();
        self.completed_commands = 0;
    }

    fn snapshot(&self) -> MachineState {
        MachineState {
            completed_commands: self.completed_commands,
            pending_commands: self.console_queue.len() + self.gcode_queue.len(),
            current_position: self.current_position,
            last_instruction: self.last_run_command.clone(),
            active_buffer: self.buffer_queue.iter().cloned().collect(),
            running: self.running,
            paused: self.run_state == RunState::Paused,
            stopping: self.stopping,
        }
    }

    async fn publish(&mut self, event: Event) {
        if self.events.send(event).await.is_err() {
            debug!("machine: event subscriber dropped");
        }
    }
}
