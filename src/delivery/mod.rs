//! Message delivery: sinks, the delivery loop and its supervisor

pub mod runner;
pub mod sink;
pub mod supervisor;

pub use runner::{
    deliver, interruptible_sleep, run_once, run_session, shutdown_requested, DeliveryEnd,
    DeliveryStats, RunSettings,
};
pub use sink::{stdout_sink, LogSink, MessageRecord, MessageSink, OutputFormat, WriterSink};
pub use supervisor::{ReconnectPolicy, ReconnectionDecision, RunOutcome, Supervisor};
