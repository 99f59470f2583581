//! One poll cycle at a time: request, reassemble, decode, publish.
//!
//! All state is owned by a single [`Poller`] and mutated from a single task. Timer ticks,
//! notifications and link changes are delivered to it as [`Event`]s over a channel, so
//! the BLE side never touches the frame buffer or liveness counter directly.

use log::{debug, trace, warn};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::controller_state::ControllerState;
use crate::frame_assembler::FrameAssembler;
use crate::liveness::{Liveness, LivenessTracker};
use crate::message::read_registers;
use crate::sink::Sinks;

/// Link status as reported by the BLE side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    /// Connected but not yet subscribed to notifications
    Connected,
    /// Subscribed; requests can be sent
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The poll interval elapsed
    Tick,
    /// Raw bytes from one notification
    Notification(Vec<u8>),
    Link(LinkState),
}

/// Submits a request frame to the device without waiting for it to complete.
pub trait RequestWriter {
    fn submit(&mut self, request: &[u8]) -> anyhow::Result<()>;
}

pub struct Poller {
    assembler: FrameAssembler,
    liveness: LivenessTracker,
    link: LinkState,
    sinks: Sinks,
    verify_checksum: bool,
}

impl Poller {
    pub fn new(config: &Config, sinks: Sinks) -> Self {
        Self {
            assembler: FrameAssembler::new(),
            liveness: LivenessTracker::new(config.max_no_response_count),
            link: LinkState::Disconnected,
            sinks,
            verify_checksum: config.verify_checksum,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    pub fn assembler(&self) -> &FrameAssembler {
        &self.assembler
    }

    /// Start a new poll cycle.
    ///
    /// Anything still in the frame buffer belongs to the previous cycle and is dropped
    /// before the request goes out.
    pub fn on_tick<W: RequestWriter>(&mut self, writer: &mut W) {
        if let Some(liveness) = self.liveness.tick() {
            self.sinks.publish_liveness(liveness);
        }

        if self.link != LinkState::Ready {
            warn!("Not connected");
            return;
        }

        self.assembler.clear();
        trace!("Send command: {}", hex::encode(read_registers::REQUEST));
        if let Err(err) = writer.submit(&read_registers::REQUEST) {
            warn!("Request submission failed: {err}");
        }
    }

    /// Handle the bytes of a single notification.
    ///
    /// Returns the decoded state when these bytes completed a valid response.
    pub fn on_notification(&mut self, data: &[u8]) -> Option<ControllerState> {
        trace!("RX notification: 0x{}", hex::encode(data));
        self.assembler.append(data);

        let frame = self.assembler.frame()?;
        if self.verify_checksum && !FrameAssembler::verify_frame_checksum(frame) {
            warn!("CRC check failed: {}", hex::encode(frame));
            return None;
        }

        let payload = self.assembler.try_take_frame()?;
        let state = match ControllerState::decode(payload) {
            Ok(state) => state,
            Err(err) => {
                warn!("{err}");
                return None;
            }
        };

        let liveness = self.liveness.reset();
        self.sinks.publish_liveness(liveness);
        for reading in state.readings() {
            self.sinks.publish(reading);
        }

        Some(state)
    }

    pub fn on_link_state(&mut self, state: LinkState) {
        debug!("Link state {:?} -> {:?}", self.link, state);
        if state == LinkState::Disconnected {
            self.assembler.clear();
        }
        self.link = state;
    }

    pub fn handle<W: RequestWriter>(&mut self, event: Event, writer: &mut W) -> Option<ControllerState> {
        match event {
            Event::Tick => {
                self.on_tick(writer);
                None
            }
            Event::Notification(data) => self.on_notification(&data),
            Event::Link(state) => {
                self.on_link_state(state);
                None
            }
        }
    }

    /// Process events until every sender has been dropped.
    pub async fn run<W: RequestWriter>(mut self, mut events: mpsc::Receiver<Event>, mut writer: W) -> Self {
        while let Some(event) = events.recv().await {
            self.handle(event, &mut writer);
        }
        debug!("Event channel closed");
        self
    }

    /// Whether the device is currently considered online
    pub fn status(&self) -> Liveness {
        if self.liveness.is_online() {
            Liveness::Online
        } else {
            Liveness::Offline
        }
    }
}

#[cfg(test)]
use std::sync::{Arc, Mutex};

#[cfg(test)]
type Recorded<T> = Arc<Mutex<Vec<T>>>;

/// Records every submitted request
#[cfg(test)]
#[derive(Default, Clone)]
struct RecordingWriter(Recorded<Vec<u8>>);

#[cfg(test)]
impl RequestWriter for RecordingWriter {
    fn submit(&mut self, request: &[u8]) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(request.to_vec());
        Ok(())
    }
}

#[cfg(test)]
impl RecordingWriter {
    fn sent(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }
}

#[cfg(test)]
struct FailingWriter;

#[cfg(test)]
impl RequestWriter for FailingWriter {
    fn submit(&mut self, _request: &[u8]) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("write failed"))
    }
}

#[cfg(test)]
fn recording_sinks() -> (Sinks, Recorded<crate::Reading>, Recorded<bool>) {
    let readings = Arc::new(Mutex::new(Vec::new()));
    let online = Arc::new(Mutex::new(Vec::new()));
    let readings_in_sink = readings.clone();
    let online_in_sink = online.clone();
    let sinks = Sinks::new()
        .with_all_channels(move |r: crate::Reading| readings_in_sink.lock().unwrap().push(r))
        .with_online_status(move |o| online_in_sink.lock().unwrap().push(o));
    (sinks, readings, online)
}

#[cfg(test)]
fn ready_poller(sinks: Sinks) -> Poller {
    let mut poller = Poller::new(&Config::default(), sinks);
    poller.on_link_state(LinkState::Ready);
    poller
}

#[test]
fn test_tick_sends_request_when_ready() {
    let mut poller = ready_poller(Sinks::new());
    let mut writer = RecordingWriter::default();
    poller.on_tick(&mut writer);
    assert_eq!(writer.sent(), vec![hex::decode("010301010013543b").unwrap()]);
}

#[test]
fn test_tick_sends_nothing_when_not_ready() {
    let mut poller = Poller::new(&Config::default(), Sinks::new());
    let mut writer = RecordingWriter::default();
    poller.on_tick(&mut writer);
    poller.on_link_state(LinkState::Connected);
    poller.on_tick(&mut writer);
    assert!(writer.sent().is_empty());
    assert_eq!(poller.liveness().no_response_count(), 2);
}

#[test]
fn test_tick_clears_previous_cycle() {
    let mut poller = ready_poller(Sinks::new());
    poller.on_notification(&[0x01, 0x03, 0x26, 0x00]);
    assert_eq!(poller.assembler().len(), 4);
    poller.on_tick(&mut RecordingWriter::default());
    assert!(poller.assembler().is_empty());
}

#[test]
fn test_submission_failure_is_tolerated() {
    let mut poller = ready_poller(Sinks::new());
    for _ in 0..3 {
        poller.on_tick(&mut FailingWriter);
    }
    assert_eq!(poller.liveness().no_response_count(), 3);
}

#[test]
fn test_split_delivery_matches_single_delivery() {
    let frame = crate::frame_assembler::full_frame();

    let (sinks, split_readings, _) = recording_sinks();
    let mut poller = ready_poller(sinks);
    assert_eq!(poller.on_notification(&frame[..3]), None);
    let split = poller.on_notification(&frame[3..]);

    let (sinks, whole_readings, _) = recording_sinks();
    let mut poller = ready_poller(sinks);
    let whole = poller.on_notification(&frame);

    assert!(split.is_some());
    assert_eq!(split, whole);
    assert_eq!(*split_readings.lock().unwrap(), *whole_readings.lock().unwrap());
    assert_eq!(split_readings.lock().unwrap().len(), crate::Channel::ALL.len());
}

#[test]
fn test_response_resets_liveness_and_publishes_online() {
    let (sinks, _, online) = recording_sinks();
    let mut poller = ready_poller(sinks);
    let mut writer = RecordingWriter::default();
    for _ in 0..10 {
        poller.on_tick(&mut writer);
    }
    assert_eq!(poller.status(), Liveness::Offline);
    assert_eq!(*online.lock().unwrap(), vec![false]);

    poller.on_notification(&crate::frame_assembler::full_frame());
    assert_eq!(poller.status(), Liveness::Online);
    assert_eq!(poller.liveness().no_response_count(), 0);
    assert_eq!(*online.lock().unwrap(), vec![false, true]);
}

#[test]
fn test_wrong_payload_length_publishes_nothing() {
    let (sinks, readings, online) = recording_sinks();
    let mut poller = ready_poller(sinks);
    let frame = hex::decode("0103040001000200ff").unwrap();
    assert_eq!(poller.on_notification(&frame), None);
    assert!(readings.lock().unwrap().is_empty());
    assert!(online.lock().unwrap().is_empty());
    assert_eq!(poller.assembler().len(), frame.len());
}

#[test]
fn test_bad_checksum_is_decoded_by_default() {
    let mut frame = crate::frame_assembler::full_frame();
    let last = frame.len() - 1;
    frame[last] ^= 0xff;
    let mut poller = ready_poller(Sinks::new());
    assert!(poller.on_notification(&frame).is_some());
}

#[test]
fn test_bad_checksum_rejected_when_verifying() {
    let mut frame = crate::frame_assembler::full_frame();
    let last = frame.len() - 1;
    frame[last] ^= 0xff;
    let config = Config::default().with_verify_checksum(true);
    let (sinks, readings, _) = recording_sinks();
    let mut poller = Poller::new(&config, sinks);
    poller.on_link_state(LinkState::Ready);
    assert_eq!(poller.on_notification(&frame), None);
    assert!(readings.lock().unwrap().is_empty());

    let mut poller = Poller::new(&config, Sinks::new());
    assert!(poller.on_notification(&crate::frame_assembler::full_frame()).is_some());
}

#[test]
fn test_disconnect_clears_buffer_but_not_liveness() {
    let frame = crate::frame_assembler::full_frame();
    let mut poller = ready_poller(Sinks::new());
    poller.on_tick(&mut RecordingWriter::default());
    poller.on_notification(&frame[..10]);
    poller.on_tick(&mut RecordingWriter::default());
    poller.on_notification(&frame[..10]);

    poller.on_link_state(LinkState::Disconnected);
    assert!(poller.assembler().is_empty());
    assert_eq!(poller.liveness().no_response_count(), 2);
    assert_eq!(poller.link_state(), LinkState::Disconnected);
}

#[test]
fn test_offline_published_once_while_disconnected() {
    let (sinks, _, online) = recording_sinks();
    let mut poller = ready_poller(sinks);
    let mut writer = RecordingWriter::default();
    poller.on_tick(&mut writer);
    poller.on_link_state(LinkState::Disconnected);

    for _ in 0..8 {
        poller.on_tick(&mut writer);
    }
    assert!(online.lock().unwrap().is_empty());

    poller.on_tick(&mut writer);
    assert_eq!(*online.lock().unwrap(), vec![false]);
    assert_eq!(poller.status(), Liveness::Offline);

    poller.on_tick(&mut writer);
    assert_eq!(*online.lock().unwrap(), vec![false]);
    // Only the tick before the link dropped sent a request
    assert_eq!(writer.sent().len(), 1);
}

#[tokio::test]
async fn test_run_processes_events_in_order() {
    let (sinks, readings, online) = recording_sinks();
    let poller = Poller::new(&Config::default(), sinks);
    let (tx, rx) = mpsc::channel(16);
    let frame = crate::frame_assembler::full_frame();

    tx.send(Event::Link(LinkState::Connected)).await.unwrap();
    tx.send(Event::Tick).await.unwrap();
    tx.send(Event::Link(LinkState::Ready)).await.unwrap();
    tx.send(Event::Tick).await.unwrap();
    tx.send(Event::Notification(frame[..3].to_vec())).await.unwrap();
    tx.send(Event::Notification(frame[3..].to_vec())).await.unwrap();
    drop(tx);

    let writer = RecordingWriter::default();
    let poller = poller.run(rx, writer.clone()).await;

    assert_eq!(writer.sent().len(), 1);
    assert_eq!(*online.lock().unwrap(), vec![true]);
    assert_eq!(readings.lock().unwrap().len(), crate::Channel::ALL.len());
    assert_eq!(poller.status(), Liveness::Online);
    assert_eq!(poller.link_state(), LinkState::Ready);
}

#[tokio::test]
async fn test_run_keeps_ticking_after_link_loss() {
    let (sinks, _, online) = recording_sinks();
    let poller = Poller::new(&Config::default(), sinks);
    let (tx, rx) = mpsc::channel(32);

    tx.send(Event::Link(LinkState::Ready)).await.unwrap();
    tx.send(Event::Notification(crate::frame_assembler::full_frame())).await.unwrap();
    tx.send(Event::Link(LinkState::Disconnected)).await.unwrap();
    for _ in 0..11 {
        tx.send(Event::Tick).await.unwrap();
    }
    drop(tx);

    let writer = RecordingWriter::default();
    let poller = poller.run(rx, writer.clone()).await;

    assert!(writer.sent().is_empty());
    assert_eq!(*online.lock().unwrap(), vec![true, false]);
    assert_eq!(poller.status(), Liveness::Offline);
    assert_eq!(poller.liveness().no_response_count(), 11);
}
