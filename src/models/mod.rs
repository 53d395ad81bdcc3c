//! # Model Layer
//!
//! One file per persisted entity. Models own their SQL; higher layers
//! (orchestration, web) never write queries directly.

pub mod checkpoint;
pub mod cycle_run;
pub mod dead_letter;
pub mod dispatch_job;
pub mod execution_record;
pub mod halt_flag;
pub mod initiation;
pub mod normalization;
pub mod transformation;

pub use checkpoint::{Checkpoint, CycleStage};
pub use cycle_run::{CycleContext, CycleRun, CycleStatus, CycleTrigger};
pub use dead_letter::DeadLetterDispatch;
pub use dispatch_job::{DispatchJob, DispatchJobStatus, NewDispatchJob};
pub use execution_record::{ExecutionRecord, RecordLevel, RecordScope};
pub use halt_flag::HaltFlag;
pub use initiation::{Initiation, NewInitiation};
pub use normalization::{NormalizationBatch, NormalizationItem};
pub use transformation::{Transformation, TransformationStatus};
