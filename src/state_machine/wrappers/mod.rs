//! Wrappers that let a runner inject system resources into a [`StateMachine`] as ordinary input.
//!
//! [`StateMachine`]: super::StateMachine

pub mod input;
