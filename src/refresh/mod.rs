pub mod coalescer;

pub use coalescer::{CoalescerError, RefreshCoalescer, RefreshSender, GET_STATE_TOPIC};
