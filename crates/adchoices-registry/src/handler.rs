//! Inbound cross-frame messages
//!
//! Every frame that loads the library answers pulls for its own registry and
//! consumes replies to pulls it sent. Payloads that are not ours are logged
//! and dropped; the page may carry other postMessage traffic. Replies count
//! only from frames this round is still waiting on.

use crate::engine::AdChoices;
use adchoices_core::{FrameRef, PullAck, Result, WireMessage};
use tracing::{debug, warn};

impl AdChoices {
    /// Dispatch one postMessage event received by this frame.
    pub fn handle_message(&self, source: FrameRef, data: &str) -> Result<()> {
        if source == self.frame() {
            debug!("Ignoring message from self");
            return Ok(());
        }
        let message = match WireMessage::parse(data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Rejected message from {}: {}", source, e);
                return Ok(());
            }
        };
        debug!("Received {} from {}", message.kind(), source);

        match message {
            WireMessage::Pull(id) => {
                let items = self.registry().get_by_id(id);
                let reply = WireMessage::pull_ack(id, items).to_wire();
                self.host().post_message(source, reply)
            }
            WireMessage::PullAck(PullAck { id, items }) => {
                let release = !items.is_empty();
                if !self.accept_reply(id, source, items) {
                    debug!("Unexpected or late reply for ID {} from {}, dropping", id, source);
                    return Ok(());
                }
                if release {
                    if let Err(e) = self.host().post_message(source, WireMessage::unregister(id).to_wire()) {
                        warn!("Could not release ID {} at {}: {}", id, source, e);
                    }
                }
                self.check_and_reduce_post_message_counter(id, source).map(|_| ())
            }
            WireMessage::Unregister(id) => {
                self.unregister(id);
                Ok(())
            }
            WireMessage::UnregisterAck(_) => Ok(()),
        }
    }
}
