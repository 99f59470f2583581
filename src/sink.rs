use std::collections::HashMap;

use crate::controller_state::{Channel, Reading};
use crate::liveness::Liveness;

type ValueSink = Box<dyn FnMut(f32) + Send>;
type OnlineSink = Box<dyn FnMut(bool) + Send>;

/// Consumers of decoded values. Any channel may be left unbound, in which case
/// publishing to it does nothing.
#[derive(Default)]
pub struct Sinks {
    values: HashMap<Channel, ValueSink>,
    online_status: Option<OnlineSink>,
}

impl Sinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a consumer for `channel`, replacing any previous one
    pub fn with_channel(mut self, channel: Channel, sink: impl FnMut(f32) + Send + 'static) -> Self {
        self.values.insert(channel, Box::new(sink));
        self
    }

    pub fn with_online_status(mut self, sink: impl FnMut(bool) + Send + 'static) -> Self {
        self.online_status = Some(Box::new(sink));
        self
    }

    /// Bind the same consumer to every channel
    pub fn with_all_channels(mut self, sink: impl FnMut(Reading) + Send + Clone + 'static) -> Self {
        for channel in Channel::ALL {
            let mut sink = sink.clone();
            self.values.insert(channel, Box::new(move |value| sink(Reading { channel, value })));
        }
        self
    }

    pub fn publish(&mut self, reading: Reading) {
        if let Some(sink) = self.values.get_mut(&reading.channel) {
            sink(reading.value);
        }
    }

    pub fn publish_liveness(&mut self, liveness: Liveness) {
        if let Some(sink) = self.online_status.as_mut() {
            sink(liveness.is_online());
        }
    }
}

#[test]
fn test_unbound_channel_is_a_no_op() {
    let mut sinks = Sinks::new();
    sinks.publish(Reading { channel: Channel::LoadPower, value: 1.0 });
    sinks.publish_liveness(Liveness::Offline);
}

#[test]
fn test_publish_reaches_bound_channel_only() {
    use std::sync::{Arc, Mutex};

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_sink = seen.clone();
    let mut sinks = Sinks::new()
        .with_channel(Channel::PanelVoltage, move |v| seen_in_sink.lock().unwrap().push(v));

    sinks.publish(Reading { channel: Channel::PanelVoltage, value: 18.5 });
    sinks.publish(Reading { channel: Channel::BatteryVoltage, value: 12.0 });
    assert_eq!(*seen.lock().unwrap(), vec![18.5]);
}

#[test]
fn test_online_status_sink() {
    use std::sync::{Arc, Mutex};

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_sink = seen.clone();
    let mut sinks =
        Sinks::new().with_online_status(move |online| seen_in_sink.lock().unwrap().push(online));

    sinks.publish_liveness(Liveness::Online);
    sinks.publish_liveness(Liveness::Offline);
    assert_eq!(*seen.lock().unwrap(), vec![true, false]);
}

#[test]
fn test_with_all_channels() {
    use std::sync::{Arc, Mutex};

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_sink = seen.clone();
    let mut sinks =
        Sinks::new().with_all_channels(move |r: Reading| seen_in_sink.lock().unwrap().push(r));

    for channel in Channel::ALL {
        sinks.publish(Reading { channel, value: 3.0 });
    }
    let seen = seen.lock().unwrap();
    let channels: Vec<Channel> = seen.iter().map(|r| r.channel).collect();
    assert_eq!(channels, Channel::ALL.to_vec());
    assert!(seen.iter().all(|r| r.value == 3.0));
}
