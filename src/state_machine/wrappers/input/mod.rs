use impl_trait_for_tuples::impl_for_tuples;

/// The [`SystemResource`] trait marks a value that only the system context can produce, such as
/// the current time.
///
/// Runners call [`generate`](SystemResource::generate) on the impure side of the boundary and
/// pass the result into a [`StateMachine`](crate::state_machine::StateMachine) through
/// [`SystemInput::System`], keeping the machine itself deterministic.
pub trait SystemResource {
    /// Produce an instance of this resource from the implicit system context.
    fn generate() -> Self;
}

#[impl_for_tuples(1, 12)]
impl SystemResource for Tuple {
    fn generate() -> Self {
        for_tuples!( ( #( Tuple::generate() ),* ) )
    }
}

impl SystemResource for std::time::Instant {
    fn generate() -> Self {
        std::time::Instant::now()
    }
}

/// A [`StateMachine`](crate::state_machine::StateMachine) input wrapper carrying either a
/// domain input `I` or a [`SystemResource`] sample `S`.
#[derive(Debug)]
pub enum SystemInput<I, S> {
    Input(I),
    System(S),
}

impl<I, S: SystemResource> SystemInput<I, S> {
    /// Sample the system resource now.
    pub fn sample() -> Self {
        SystemInput::System(S::generate())
    }
}
