pub mod mission;
pub mod wrappers;

/// The [`StateMachine`] trait provides calling semantics for deterministic, IO-free protocol
/// logic.
///
/// # Functionality
/// A state machine consumes typed [`Input`](StateMachine::Input) and yields typed
/// [`Output`](StateMachine::Output). Both are usually enums grouping every kind of message the
/// machine understands or produces; the trait impl is only the dispatch layer that maps those
/// variants onto inherent methods, keeping the machine itself focused on its transitions.
///
/// The driver of a machine (a "runner") owns every real resource: sockets, timers, the clock and
/// any cancellation flags. It feeds observations in through
/// [`process_input`](StateMachine::process_input) and carries out the effects requested through
/// [`poll_output`](StateMachine::poll_output).
///
/// # Invariants
/// Implementors *must* uphold the following so that identical input sequences always produce
/// identical output sequences, which is what makes mission logic replayable in tests.
///
/// ## No Interior Mutability
/// State changes only through `&mut self`. No [`std::cell`] containers, no [`std::sync`] locks and
/// no reference-counted sharing. `&'static` references to immutable data are fine.
///
/// ## No IO
/// No [`std::io`], [`std::net`] or anything wrapping them. Commands leave the machine as output
/// and their results come back as input.
///
/// ### No System Time
/// Never call [`std::time::Instant::now`] or read [`std::time::SystemTime`] from inside the
/// machine. Time is an input like any other; see [`SystemInput`](wrappers::input::SystemInput).
///
/// ### No System RNG
/// Randomness, if ever needed, must come from a PRNG seeded through input.
///
/// ## No Concurrency, No Async, No Blocking
/// The machine never spawns, awaits or sleeps. A runner may drive it from an async task, but each
/// call into the machine returns immediately.
///
/// # Side Effects
/// Logging is allowed, provided the machine's logic never depends on its outcome.
///
/// # Example
/// ```ignore
/// pub struct Beacon {
///     battery_pct: Option<u8>,
///     pending: bool,
/// }
///
/// pub enum BeaconInput {
///     Battery(u8),
/// }
///
/// pub enum BeaconOutput {
///     LowBattery(u8),
/// }
///
/// impl StateMachine for Beacon {
///     type Input = BeaconInput;
///     type Output = BeaconOutput;
///
///     fn process_input(&mut self, input: Self::Input) {
///         match input {
///             BeaconInput::Battery(pct) => {
///                 self.battery_pct = Some(pct);
///                 self.pending = pct < 10;
///             }
///         }
///     }
///
///     fn poll_output(&mut self) -> Option<Self::Output> {
///         if std::mem::take(&mut self.pending) {
///             return self.battery_pct.map(BeaconOutput::LowBattery);
///         }
///         None
///     }
/// }
/// ```
pub trait StateMachine {
    /// The type of input that is [processed](StateMachine::process_input) by the state machine.
    type Input;
    /// The type of output that is [polled](StateMachine::poll_output) from the state machine.
    type Output;

    /// Process the provided `input` into the state machine.
    fn process_input(&mut self, input: Self::Input);

    /// Poll the state machine for output, returning the next available output if present.
    fn poll_output(&mut self) -> Option<Self::Output>;
}
