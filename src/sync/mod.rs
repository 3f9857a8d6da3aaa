pub mod hub;
pub mod live;
pub mod remote;

pub use hub::{ChangeEvent, ChangeHub};
pub use live::{LiveEvent, LiveFrame, LiveQueries, Subscription, SubscriptionState};

// Live queries: the stores publish a ChangeEvent on every committed write,
// and each subscription re-reads its full result set when an event touches
// the conversation (or participant) it is watching.
