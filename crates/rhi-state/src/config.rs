//! Device and command-list configuration.

/// Maximum number of simultaneously bound color attachments.
pub const MAX_RENDER_TARGETS: usize = 8;
/// Maximum number of viewports / scissor rects in one state.
pub const MAX_VIEWPORTS: usize = 16;
/// Maximum number of vertex attributes and vertex buffer slots.
pub const MAX_VERTEX_ATTRIBUTES: usize = 16;
/// Upper bound on binding layouts per pipeline.
pub const MAX_BINDING_LAYOUTS: usize = 8;
/// Upper bound on volatile constant buffers in one binding layout.
pub const MAX_VOLATILE_CONSTANT_BUFFERS_PER_LAYOUT: usize = 6;
/// Maximum push-constant payload in bytes.
pub const MAX_PUSH_CONSTANT_SIZE: usize = 128;

/// Execution queue a command list is recorded for and submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandQueue {
    #[default]
    Graphics,
    Compute,
    Copy,
}

impl CommandQueue {
    pub const ALL: [CommandQueue; 3] = [CommandQueue::Graphics, CommandQueue::Compute, CommandQueue::Copy];

    pub(crate) fn index(self) -> usize {
        match self {
            CommandQueue::Graphics => 0,
            CommandQueue::Compute => 1,
            CommandQueue::Copy => 2,
        }
    }

    pub fn supports_graphics(self) -> bool {
        matches!(self, CommandQueue::Graphics)
    }

    pub fn supports_compute(self) -> bool {
        matches!(self, CommandQueue::Graphics | CommandQueue::Compute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Default for [`CommandListParameters::enable_automatic_barriers`].
    pub automatic_barriers: bool,
    /// Cross-check the state cache against a full re-derivation after every
    /// `set*State` call. Expensive; meant for debugging backends.
    pub validate_state_cache: bool,
    /// Payload limit for `set_push_constants`.
    pub max_push_constant_size: usize,
    /// Default version limit for volatile buffers that declare `max_versions == 0`.
    pub default_volatile_versions: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            automatic_barriers: true,
            validate_state_cache: false,
            max_push_constant_size: MAX_PUSH_CONSTANT_SIZE,
            default_volatile_versions: 1024,
        }
    }
}

impl DeviceConfig {
    /// Applies `RHI_DISABLE_AUTOMATIC_BARRIERS` and `RHI_VALIDATE_STATE_CACHE`.
    pub fn with_env_overrides(mut self) -> Self {
        if env_var_truthy("RHI_DISABLE_AUTOMATIC_BARRIERS") {
            self.automatic_barriers = false;
        }
        if env_var_truthy("RHI_VALIDATE_STATE_CACHE") {
            self.validate_state_cache = true;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandListParameters {
    pub queue: CommandQueue,
    /// `None` inherits [`DeviceConfig::automatic_barriers`].
    pub enable_automatic_barriers: Option<bool>,
}

impl Default for CommandListParameters {
    fn default() -> Self {
        Self {
            queue: CommandQueue::Graphics,
            enable_automatic_barriers: None,
        }
    }
}

impl CommandListParameters {
    pub fn for_queue(queue: CommandQueue) -> Self {
        Self {
            queue,
            ..Self::default()
        }
    }
}

pub(crate) fn env_var_truthy(name: &str) -> bool {
    let Ok(raw) = std::env::var(name) else {
        return false;
    };

    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_capabilities() {
        assert!(CommandQueue::Graphics.supports_graphics());
        assert!(CommandQueue::Compute.supports_compute());
        assert!(!CommandQueue::Compute.supports_graphics());
        assert!(!CommandQueue::Copy.supports_compute());
    }

    #[test]
    fn unset_env_var_is_not_truthy() {
        assert!(!env_var_truthy("RHI_STATE_TEST_UNSET_VARIABLE_FOR_CONFIG"));
    }
}
