/// Counters for one command list recording, reset on `open()`.
///
/// Cheap to copy; read them after `close()` to see how much work the state
/// cache elided.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandListStats {
    pub barrier_batches: u64,
    pub texture_barriers: u64,
    pub buffer_barriers: u64,
    pub uav_barriers: u64,

    pub pipeline_binds: u64,
    pub render_pass_begins: u64,
    pub render_pass_ends: u64,
    pub binding_set_binds: u64,
    pub volatile_rebinds: u64,

    pub draws: u64,
    pub dispatches: u64,
    pub copies: u64,
}

impl CommandListStats {
    pub(crate) fn bump(counter: &mut u64) {
        *counter = counter.saturating_add(1);
    }
}
