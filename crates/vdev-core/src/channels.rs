// ── Channel board ──
//
// Last published value of every (device, channel) pair, plus a broadcast
// of every report so the host side can forward them. Publishing is
// change-gated unless forced.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::fields::Channel;

const REPORT_CHANNEL_CAPACITY: usize = 256;

/// One outbound report.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Channel {
        device: Arc<str>,
        channel: Channel,
        value: f64,
    },
    Heartbeat {
        device: Arc<str>,
        on: bool,
    },
}

pub struct ChannelBoard {
    values: DashMap<(Arc<str>, Channel), f64>,
    reports: broadcast::Sender<Report>,
}

impl Default for ChannelBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelBoard {
    pub fn new() -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            values: DashMap::new(),
            reports,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Report> {
        self.reports.subscribe()
    }

    /// Publish `value` on `channel`. Returns `true` if a report went out,
    /// which happens when the value changed or `force` is set.
    #[allow(clippy::float_cmp)]
    pub fn publish(&self, device: &str, channel: Channel, value: f64, force: bool) -> bool {
        let device: Arc<str> = Arc::from(device);
        let previous = self.values.insert((Arc::clone(&device), channel), value);
        if !force && previous == Some(value) {
            return false;
        }
        // No subscribers is fine.
        let _ = self.reports.send(Report::Channel {
            device,
            channel,
            value,
        });
        true
    }

    pub fn get(&self, device: &str, channel: Channel) -> Option<f64> {
        self.values
            .get(&(Arc::from(device), channel))
            .map(|v| *v.value())
    }

    pub fn heartbeat(&self, device: &str, on: bool) {
        let _ = self.reports.send(Report::Heartbeat {
            device: Arc::from(device),
            on,
        });
    }

    /// Every published channel of `device`, in channel order.
    pub fn snapshot(&self, device: &str) -> Vec<(Channel, f64)> {
        let mut out: Vec<(Channel, f64)> = self
            .values
            .iter()
            .filter(|entry| &*entry.key().0 == device)
            .map(|entry| (entry.key().1, *entry.value()))
            .collect();
        out.sort_by_key(|(channel, _)| *channel);
        out
    }
}
