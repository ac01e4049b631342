mod burst;
mod worker;
#[cfg(test)]
pub(crate) mod tests;

pub use burst::BurstWindow;
pub use worker::{CameraWorker, PipelineContext, WorkerCommand, WorkerHandle, WorkerStatus};
