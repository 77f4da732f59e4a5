//! Value tuples, accumulation modes, and metric kinds.
//!
//! A slide stores fixed-arity tuples of `i64` fields. What those fields mean
//! is defined by the [`MetricKind`] of the key the slide belongs to, which the
//! store keeps beside the slide and only consults for defaults and formatting.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A fixed-arity tuple of numeric fields.
///
/// Arithmetic saturates so that pathological counters never panic on the
/// write path. All values written to one slide must share an arity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(Vec<i64>);

impl Values {
    /// Creates a value tuple from its fields.
    pub fn new(fields: Vec<i64>) -> Self {
        Self(fields)
    }

    /// Creates the additive identity of the given arity.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use slidestore::values::Values;
    ///
    /// let empty = Values::zeros(3);
    /// assert_eq!(empty.as_slice(), &[0, 0, 0]);
    /// assert!(empty.is_zero());
    /// ```
    pub fn zeros(arity: usize) -> Self {
        Self(vec![0; arity])
    }

    /// Returns the number of fields.
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Returns the fields as a slice.
    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    /// Returns a single field, or `None` if out of range.
    pub fn get(&self, index: usize) -> Option<i64> {
        self.0.get(index).copied()
    }

    /// Returns `true` if every field is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0)
    }

    /// Adds `other` elementwise into `self`.
    ///
    /// Callers check arity beforehand; extra fields on either side are ignored.
    pub fn add_assign(&mut self, other: &Values) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a = a.saturating_add(*b);
        }
    }

    /// Returns the elementwise sum of `self` and `other`.
    pub fn add(&self, other: &Values) -> Values {
        let mut sum = self.clone();
        sum.add_assign(other);
        sum
    }

    /// Returns the elementwise difference `self - other`.
    pub fn sub(&self, other: &Values) -> Values {
        Values(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| a.saturating_sub(*b))
                .collect(),
        )
    }
}

impl From<Vec<i64>> for Values {
    fn from(fields: Vec<i64>) -> Self {
        Self(fields)
    }
}

impl<const N: usize> From<[i64; N]> for Values {
    fn from(fields: [i64; N]) -> Self {
        Self(fields.to_vec())
    }
}

/// How writes inside one bucket combine and how buckets relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Writes are deltas; the slide keeps a running total across the whole
    /// series and each committed sample is the total at bucket close.
    Cumulative,

    /// Each bucket holds only the sum of the writes that landed in it.
    Delta,

    /// Each bucket holds the most recent reading written into it.
    Gauge,
}

impl Mode {
    /// Returns `true` if a bucket's value stays valid after the bucket closes,
    /// so later points can be filled by carrying it forward.
    pub fn carries_forward(self) -> bool {
        matches!(self, Self::Cumulative | Self::Gauge)
    }

    /// Returns the lowercase name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cumulative => "cumulative",
            Self::Delta => "delta",
            Self::Gauge => "gauge",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of metric shapes the broker records.
///
/// Each kind fixes the arity, field names and field order of its value
/// tuples, the accumulation mode its producer uses, and the retention policy
/// its slides are created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Per-process reductions (connections, channels, queues).
    ProcessStats,
    /// Messages published into a queue.
    QueueStatsPublish,
    /// Messages published from an exchange into a queue.
    QueueExchangeStatsPublish,
    /// Raw socket octet counters of a connection.
    CoarseConnStats,
    /// Inter-node distribution traffic.
    CoarseNodeNodeStats,
    /// Queue persistence activity.
    QueueMsgRates,
    /// Queue depth readings.
    QueueMsgCounts,
    /// Channel publish-side counters.
    FineStats,
    /// Object churn per bucket.
    ConnectionChurnRates,
    /// Consumer-side delivery counters.
    DeliverGet,
    /// Node resource readings.
    CoarseNodeStats,
}

const PROCESS_STATS_FIELDS: &[&str] = &["reductions"];
const PUBLISH_FIELDS: &[&str] = &["publish"];
const COARSE_CONN_FIELDS: &[&str] = &["recv_oct", "send_oct"];
const NODE_NODE_FIELDS: &[&str] = &["send_bytes", "recv_bytes"];
const QUEUE_MSG_RATES_FIELDS: &[&str] = &["disk_reads", "disk_writes"];
const QUEUE_MSG_COUNTS_FIELDS: &[&str] =
    &["messages", "messages_ready", "messages_unacknowledged"];
const FINE_STATS_FIELDS: &[&str] = &["publish", "confirm", "return_unroutable"];
const CHURN_FIELDS: &[&str] = &[
    "connection_created",
    "connection_closed",
    "channel_created",
    "channel_closed",
    "queue_declared",
    "queue_created",
    "queue_deleted",
];
const DELIVER_GET_FIELDS: &[&str] = &[
    "deliver",
    "deliver_no_ack",
    "get",
    "get_no_ack",
    "redeliver",
    "ack",
    "get_empty",
    "deliver_get",
];
const COARSE_NODE_FIELDS: &[&str] = &[
    "mem_used",
    "fd_used",
    "sockets_used",
    "proc_used",
    "disk_free",
    "io_read_count",
    "io_read_bytes",
    "io_read_time",
    "io_write_count",
    "io_write_bytes",
    "io_write_time",
    "io_sync_count",
    "io_sync_time",
    "io_seek_count",
    "io_seek_time",
    "io_reopen_count",
    "mnesia_ram_tx_count",
    "mnesia_disk_tx_count",
    "gc_num",
    "gc_bytes_reclaimed",
];

impl MetricKind {
    /// Every kind, in declaration order.
    pub const ALL: [MetricKind; 11] = [
        Self::ProcessStats,
        Self::QueueStatsPublish,
        Self::QueueExchangeStatsPublish,
        Self::CoarseConnStats,
        Self::CoarseNodeNodeStats,
        Self::QueueMsgRates,
        Self::QueueMsgCounts,
        Self::FineStats,
        Self::ConnectionChurnRates,
        Self::DeliverGet,
        Self::CoarseNodeStats,
    ];

    /// Returns the field names, in tuple order.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Self::ProcessStats => PROCESS_STATS_FIELDS,
            Self::QueueStatsPublish | Self::QueueExchangeStatsPublish => PUBLISH_FIELDS,
            Self::CoarseConnStats => COARSE_CONN_FIELDS,
            Self::CoarseNodeNodeStats => NODE_NODE_FIELDS,
            Self::QueueMsgRates => QUEUE_MSG_RATES_FIELDS,
            Self::QueueMsgCounts => QUEUE_MSG_COUNTS_FIELDS,
            Self::FineStats => FINE_STATS_FIELDS,
            Self::ConnectionChurnRates => CHURN_FIELDS,
            Self::DeliverGet => DELIVER_GET_FIELDS,
            Self::CoarseNodeStats => COARSE_NODE_FIELDS,
        }
    }

    /// Returns the value tuple arity.
    pub fn arity(self) -> usize {
        self.fields().len()
    }

    /// Returns the accumulation mode the producer records this kind with.
    pub fn mode(self) -> Mode {
        match self {
            Self::ProcessStats
            | Self::QueueStatsPublish
            | Self::QueueExchangeStatsPublish
            | Self::FineStats
            | Self::DeliverGet => Mode::Cumulative,
            Self::ConnectionChurnRates => Mode::Delta,
            Self::CoarseConnStats
            | Self::CoarseNodeNodeStats
            | Self::QueueMsgRates
            | Self::QueueMsgCounts
            | Self::CoarseNodeStats => Mode::Gauge,
        }
    }

    /// Returns the name of the retention policy this kind's slides use.
    pub fn policy(self) -> &'static str {
        match self {
            Self::QueueStatsPublish
            | Self::QueueExchangeStatsPublish
            | Self::FineStats
            | Self::DeliverGet => "detailed",
            Self::ConnectionChurnRates | Self::CoarseNodeStats | Self::CoarseNodeNodeStats => {
                "global"
            }
            Self::ProcessStats
            | Self::CoarseConnStats
            | Self::QueueMsgRates
            | Self::QueueMsgCounts => "basic",
        }
    }

    /// Returns the snake_case name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessStats => "process_stats",
            Self::QueueStatsPublish => "queue_stats_publish",
            Self::QueueExchangeStatsPublish => "queue_exchange_stats_publish",
            Self::CoarseConnStats => "coarse_conn_stats",
            Self::CoarseNodeNodeStats => "coarse_node_node_stats",
            Self::QueueMsgRates => "queue_msg_rates",
            Self::QueueMsgCounts => "queue_msg_counts",
            Self::FineStats => "fine_stats",
            Self::ConnectionChurnRates => "connection_churn_rates",
            Self::DeliverGet => "deliver_get",
            Self::CoarseNodeStats => "coarse_node_stats",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown metric kind '{s}'"))
    }
}
