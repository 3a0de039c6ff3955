//! Test doubles for the transport seam.
//!
//! [`MockTransport`] lets engine tests script a whole cluster: which node
//! answers, which refuses connections, which hangs, and in what order.

mod transport;

pub use transport::{MockReply, MockRule, MockRuleBuilder, MockTransport};
