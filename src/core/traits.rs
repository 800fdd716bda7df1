//! Core traits for the grid search

use crate::core::{GridPoint, InvocationError};

/// A backend able to evaluate one grid point
///
/// Each worker owns exactly one executor and drives it from its own thread,
/// so implementations only need to be `Send`.
pub trait Executor: Send {
    /// Name used in progress output and logs
    fn name(&self) -> &str;

    /// Prepare the backend before the first job (e.g. log in to a remote host)
    fn connect(&mut self) -> Result<(), InvocationError> {
        Ok(())
    }

    /// Run a cross-validation for `point` and return its rate
    fn invoke(&mut self, point: GridPoint) -> Result<f64, InvocationError>;

    /// Release the backend once the worker stops
    fn shutdown(&mut self) {}
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn connect(&mut self) -> Result<(), InvocationError> {
        (**self).connect()
    }

    fn invoke(&mut self, point: GridPoint) -> Result<f64, InvocationError> {
        (**self).invoke(point)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}
