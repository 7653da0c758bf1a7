//! Background worker tasks
//!
//! Three tokio tasks keep a [`Driver`](crate::Driver) moving. None of them
//! owns any call state; each one only posts events to timeslots or drains a
//! queue.
//!
//! - [`Ticker`]: delivers `TIMEOUT` to every slot whose timer is due
//! - [`Dispatcher`]: drains the bounded [`MessageQueue`] and posts each event
//! - [`CdrPoster`]: writes call-detail records to a [`CdrSink`](crate::cdr::CdrSink)
//!
//! All three stop when their `CancellationToken` fires.

mod dispatcher;
mod poster;
mod ticker;

pub use dispatcher::{message_queue, Dispatcher, Message, MessageQueue, MessageReceiver};
pub use poster::CdrPoster;
pub use ticker::Ticker;
