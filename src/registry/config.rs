//! Registry configuration

/// What a broadcast does when a subscriber's mailbox is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for the subscriber to free a slot.
    ///
    /// The registry lock stays held while waiting, so a slow subscriber
    /// delays delivery to everyone until its handler drains a payload or
    /// hits its write deadline and disconnects.
    #[default]
    Block,
    /// Discard the new payload for that subscriber and count the drop
    DropNewest,
}

/// Configuration for the subscriber registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Mailbox capacity per subscriber (always at least 1)
    pub mailbox_capacity: usize,

    /// Behavior when a mailbox is full
    pub overflow: OverflowPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 10,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl RegistryConfig {
    /// Set mailbox capacity
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    /// Set the overflow policy
    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }
}
