//! Host lifecycle contract.
//!
//! The host scheduler calls [`PollingComponent::setup`] once, then
//! [`PollingComponent::update`] every [`PollingComponent::update_interval_ms`]
//! and [`PollingComponent::tick`] on every pass of its main loop. All calls
//! happen on the same thread and must not block for long.

pub trait PollingComponent {
    type Error;

    /// One-time initialization
    fn setup(&mut self) -> Result<(), Self::Error>;

    /// Timed poll
    fn update(&mut self) -> Result<(), Self::Error>;

    /// Main loop hook
    fn tick(&mut self) -> Result<(), Self::Error>;

    /// How often the host should call [`PollingComponent::update`]
    fn update_interval_ms(&self) -> u32;
}
