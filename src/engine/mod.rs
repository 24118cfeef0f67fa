//! Background processing: the workflow processor and the polling worker.

pub mod processor;
pub mod worker;

pub use processor::{ProcessOutcome, Processor};
pub use worker::{Worker, WorkerConfig, WorkerHandle, WorkerState};
