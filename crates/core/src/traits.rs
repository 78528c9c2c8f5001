use async_trait::async_trait;

/// User-facing controls for one receiver (or whichever receiver is active).
///
/// None of these report failure: a receiver that is not connected accepts
/// the call and drops it.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Start casting when idle, stop when already playing
    async fn play_pause(&self);

    async fn volume_up(&self);

    async fn volume_down(&self);

    /// Toggle mute
    async fn volume_mute(&self);

    /// Ask the receiver to push a fresh RECEIVER_STATUS
    async fn get_status(&self);
}
